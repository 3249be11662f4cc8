//! Persistence boundary for users and messages.
//!
//! The coordinator only talks to storage through [`Store`], so the engine
//! behind it can be swapped without touching pairing or relay code.

mod sqlite;

pub use sqlite::SqliteStore;
#[cfg(test)]
pub(crate) use sqlite::memory_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{Message, User, UserUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("user {0} does not exist")]
    UnknownUser(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn create_user(
        &self,
        external_id: &str,
        connection_handle: &str,
    ) -> Result<User, StoreError>;

    async fn update_user(&self, external_id: &str, update: UserUpdate) -> Result<(), StoreError>;

    async fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// Every message exchanged between `a` and `b` in either direction,
    /// oldest first.
    async fn query_messages_between(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError>;
}
