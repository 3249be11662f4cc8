use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub external_id: String,
    pub is_active: bool,
    pub current_partner_id: Option<String>,
    pub connection_handle: Option<String>,
    pub last_active_at: i64,

    // unique: external_id
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: i64,
}

/// Partial update for a [`User`]. `None` leaves a column untouched; the
/// nullable columns take `Some(None)` to be cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub is_active: Option<bool>,
    pub current_partner_id: Option<Option<String>>,
    pub connection_handle: Option<Option<String>>,
    pub last_active_at: Option<i64>,
}

impl UserUpdate {
    pub fn partner(partner: Option<String>) -> Self {
        Self {
            current_partner_id: Some(partner),
            ..Self::default()
        }
    }

    pub fn online(connection_handle: String) -> Self {
        Self {
            is_active: Some(true),
            connection_handle: Some(Some(connection_handle)),
            last_active_at: Some(now_millis()),
            ..Self::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            is_active: Some(false),
            connection_handle: Some(None),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_active.is_none()
            && self.current_partner_id.is_none()
            && self.connection_handle.is_none()
            && self.last_active_at.is_none()
    }
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
