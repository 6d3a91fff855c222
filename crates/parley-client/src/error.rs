use thiserror::Error;

use parley_shared::{Entity, ModelError};
use parley_store::StoreError;

use crate::lock_table::TaskKey;

/// Failure reported by a realm backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Realm is not connected")]
    NotConnected,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync task already running: {0}")]
    TaskAlreadyRunning(TaskKey),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid model: {0}")]
    Model(#[from] ModelError),

    #[error("Unknown realm: {0}")]
    UnknownRealm(String),

    #[error("Chat not found: {0}")]
    ChatNotFound(Entity),

    #[error("Message not found: {0}")]
    MessageNotFound(Entity),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl SyncError {
    /// Whether the same call may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TaskAlreadyRunning(_)
                | SyncError::Backend(BackendError::NotConnected)
                | SyncError::Backend(BackendError::Network(_))
        )
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_table::SyncTaskKind;

    #[test]
    fn test_retryable() {
        let busy = SyncError::TaskAlreadyRunning(TaskKey::new(
            SyncTaskKind::UserChats,
            Entity::new("xmpp", "me"),
        ));
        assert!(busy.is_retryable());
        assert!(SyncError::from(BackendError::Network("timeout".into())).is_retryable());
        assert!(!SyncError::from(BackendError::Auth("bad password".into())).is_retryable());
        assert!(!SyncError::UnknownRealm("vk".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = SyncError::ChatNotFound(Entity::new("xmpp", "room"));
        assert_eq!(err.to_string(), "Chat not found: xmpp:room");
    }
}
