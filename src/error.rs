use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("register before sending commands")]
    NotRegistered,

    #[error("no active chat")]
    NoActiveSession,

    #[error("partner {0} is unreachable")]
    PartnerUnreachable(String),

    #[error("identity is required")]
    MissingIdentity,

    #[error("message is empty")]
    EmptyMessage,

    #[error("storage unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl ChatError {
    /// Text sent back to the client. Store failures are not echoed verbatim.
    pub fn reason(&self) -> String {
        match self {
            ChatError::StoreUnavailable(_) => "service temporarily unavailable".to_owned(),
            other => other.to_string(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
