use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, sqlite::{SqliteConnectOptions, SqlitePoolOptions}};

use crate::db::{Message, User, UserUpdate, now_millis};

use super::{Store, StoreError};

const USER_COLUMNS: &str =
    "id,external_id,is_active,current_partner_id,connection_handle,last_active_at";

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Open a pool against `url`, creating the database file if needed, and
    /// bring the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self::new(db_pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id=?");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(external_id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(user)
    }

    async fn create_user(
        &self,
        external_id: &str,
        connection_handle: &str,
    ) -> Result<User, StoreError> {
        // a racing register for the same identity just refreshes the row
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (external_id,is_active,connection_handle,last_active_at) \
             VALUES (?,1,?,?) \
             ON CONFLICT(external_id) DO UPDATE SET is_active=1, \
             connection_handle=excluded.connection_handle, \
             last_active_at=excluded.last_active_at \
             RETURNING {USER_COLUMNS}"
        ))
            .bind(external_id)
            .bind(connection_handle)
            .bind(now_millis())
            .fetch_one(&self.db_pool)
            .await?;

        Ok(user)
    }

    async fn update_user(&self, external_id: &str, update: UserUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE users SET ");
        {
            let mut fields = builder.separated(", ");
            if let Some(is_active) = update.is_active {
                fields.push("is_active=").push_bind_unseparated(is_active);
            }
            if let Some(partner) = update.current_partner_id {
                fields.push("current_partner_id=").push_bind_unseparated(partner);
            }
            if let Some(handle) = update.connection_handle {
                fields.push("connection_handle=").push_bind_unseparated(handle);
            }
            if let Some(last_active_at) = update.last_active_at {
                fields.push("last_active_at=").push_bind_unseparated(last_active_at);
            }
        }
        builder.push(" WHERE external_id=").push_bind(external_id.to_owned());

        let result = builder.build().execute(&self.db_pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownUser(external_id.to_owned()));
        }

        Ok(())
    }

    async fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        // never stamp a message earlier than the previous one on the same pair
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (sender_id,receiver_id,content,timestamp) \
             VALUES (?1,?2,?3,MAX(?4,COALESCE(\
             (SELECT MAX(timestamp) FROM messages WHERE sender_id=?1 AND receiver_id=?2),0))) \
             RETURNING id,sender_id,receiver_id,content,timestamp"
        )
            .bind(sender_id)
            .bind(receiver_id)
            .bind(content)
            .bind(now_millis())
            .fetch_one(&self.db_pool)
            .await?;

        Ok(message)
    }

    async fn query_messages_between(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id,sender_id,receiver_id,content,timestamp FROM messages \
             WHERE (sender_id=?1 AND receiver_id=?2) OR (sender_id=?2 AND receiver_id=?1) \
             ORDER BY timestamp ASC, id ASC"
        )
            .bind(a)
            .bind(b)
            .fetch_all(&self.db_pool)
            .await?;

        Ok(messages)
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> SqliteStore {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite");

    let store = SqliteStore::new(db_pool);
    store.migrate().await.expect("migrate");
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_find_user() {
        let store = memory_store().await;

        let created = store.create_user("tg-1", "conn-a").await.unwrap();
        assert_eq!(created.external_id, "tg-1");
        assert!(created.is_active);
        assert_eq!(created.current_partner_id, None);
        assert_eq!(created.connection_handle.as_deref(), Some("conn-a"));

        let found = store.find_user_by_external_id("tg-1").await.unwrap();
        assert_eq!(found, Some(created));
        assert!(store.find_user_by_external_id("tg-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_existing_user_refreshes_connection() {
        let store = memory_store().await;

        let first = store.create_user("tg-1", "conn-a").await.unwrap();
        let second = store.create_user("tg-1", "conn-b").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.connection_handle.as_deref(), Some("conn-b"));
    }

    #[tokio::test]
    async fn partial_update_touches_only_given_fields() {
        let store = memory_store().await;
        store.create_user("tg-1", "conn-a").await.unwrap();

        store.update_user("tg-1", UserUpdate::partner(Some("tg-2".to_owned()))).await.unwrap();
        let user = store.find_user_by_external_id("tg-1").await.unwrap().unwrap();
        assert_eq!(user.current_partner_id.as_deref(), Some("tg-2"));
        assert_eq!(user.connection_handle.as_deref(), Some("conn-a"));
        assert!(user.is_active);

        store.update_user("tg-1", UserUpdate {
            is_active: Some(false),
            connection_handle: Some(None),
            ..UserUpdate::default()
        }).await.unwrap();
        let user = store.find_user_by_external_id("tg-1").await.unwrap().unwrap();
        assert!(!user.is_active);
        assert_eq!(user.connection_handle, None);
        assert_eq!(user.current_partner_id.as_deref(), Some("tg-2"));
    }

    #[tokio::test]
    async fn update_unknown_user_fails() {
        let store = memory_store().await;

        let err = store.update_user("ghost", UserUpdate::partner(None)).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownUser(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn history_covers_both_directions_in_order() {
        let store = memory_store().await;

        let first = store.insert_message("a", "b", "hi").await.unwrap();
        let second = store.insert_message("b", "a", "hello").await.unwrap();
        store.insert_message("a", "c", "elsewhere").await.unwrap();
        let third = store.insert_message("a", "b", "how are you").await.unwrap();

        assert!(first.id < second.id && second.id < third.id);
        assert!(third.timestamp >= first.timestamp);

        let history = store.query_messages_between("b", "a").await.unwrap();
        assert_eq!(history, vec![first, second, third]);
    }
}
