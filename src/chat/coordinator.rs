use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{db::User, error::{ChatError, ChatResult}, store::Store};

use super::{pool::WaitingPool, registry::Registry};

/// Owns every piece of shared pairing state. Pool membership and partner
/// links are only ever changed through its methods.
pub struct Coordinator {
    pub(super) store: Arc<dyn Store>,
    pub(super) registry: Registry,
    pub(super) pool: WaitingPool,
    // serializes every read-modify-write of partner links
    pub(super) links: Mutex<()>,
    pub(super) match_attempts: usize,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, send_queue: usize, match_attempts: usize) -> Self {
        Self {
            store,
            registry: Registry::new(send_queue),
            pool: WaitingPool::new(),
            links: Mutex::new(()),
            match_attempts: match_attempts.max(1),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pool(&self) -> &WaitingPool {
        &self.pool
    }

    pub(super) async fn load(&self, user_id: &str) -> ChatResult<User> {
        self.store
            .find_user_by_external_id(user_id)
            .await?
            .ok_or(ChatError::NotRegistered)
    }
}
