//! State shared by the sync orchestrator and the unread tracker.
//!
//! [`ClientState`] is built once at startup and shared behind an `Arc`.
//! The database sits behind a std `Mutex`: every store call is synchronous
//! and the guard is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use parley_store::Database;

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChatEvent, EventBus, MessageEvent, UserEvent};
use crate::realm::RealmRegistry;

pub struct ClientState {
    pub config: ClientConfig,

    /// Local mirror of every realm's chats, contacts and messages.
    pub database: Mutex<Database>,

    /// Connected accounts, keyed by realm id.
    pub realms: RealmRegistry,

    pub chat_events: EventBus<ChatEvent>,
    pub user_events: EventBus<UserEvent>,
    pub message_events: EventBus<MessageEvent>,
}

impl ClientState {
    pub fn new(config: ClientConfig, database: Database) -> Self {
        Self {
            config,
            database: Mutex::new(database),
            realms: RealmRegistry::new(),
            chat_events: EventBus::new(),
            user_events: EventBus::new(),
            message_events: EventBus::new(),
        }
    }

    /// Open the database named by `config` (or the platform default) and
    /// wrap everything for sharing.
    pub fn open(config: ClientConfig) -> SyncResult<Arc<Self>> {
        let database = match &config.database_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        info!(path = ?database.path(), "Opened client database");
        Ok(Arc::new(Self::new(config, database)))
    }

    pub fn lock_database(&self) -> SyncResult<MutexGuard<'_, Database>> {
        self.database.lock().map_err(|_| SyncError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        let state = ClientState::open(ClientConfig::default().with_database_path(&path)).unwrap();

        assert!(path.exists());
        assert!(state.lock_database().is_ok());
        assert!(state.realms.ids().is_empty());
    }
}
