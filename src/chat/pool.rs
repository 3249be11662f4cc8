use std::collections::HashSet;

use rand::seq::IteratorRandom;
use tokio::sync::Mutex;

/// Identities currently looking for a partner.
#[derive(Default)]
pub struct WaitingPool {
    members: Mutex<HashSet<String>>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, user_id: &str) {
        self.members.lock().await.insert(user_id.to_owned());
    }

    pub async fn remove(&self, user_id: &str) -> bool {
        self.members.lock().await.remove(user_id)
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.members.lock().await.contains(user_id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Uniformly random member other than `excluding`. Does not remove it.
    pub async fn pick_candidate(&self, excluding: &str) -> Option<String> {
        let members = self.members.lock().await;
        choose(&members, excluding)
    }

    /// Draw a partner for `requester` and take both out of the pool in one
    /// step. Fails if `requester` is no longer waiting, so two concurrent
    /// draws can never claim the same member.
    pub async fn claim(&self, requester: &str) -> Option<String> {
        let mut members = self.members.lock().await;
        if !members.contains(requester) {
            return None;
        }

        let candidate = choose(&members, requester)?;
        members.remove(requester);
        members.remove(&candidate);
        Some(candidate)
    }
}

fn choose(members: &HashSet<String>, excluding: &str) -> Option<String> {
    members.iter()
        .filter(|member| member.as_str() != excluding)
        .choose(&mut rand::rng())
        .cloned()
}
