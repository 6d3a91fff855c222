//! # parley-client
//!
//! Sync engine of the Parley messaging client: realm backends, the
//! single-flight sync orchestrator, unread bookkeeping and change events
//! on top of the `parley-store` mirror.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod lock_table;
pub mod orchestrator;
pub mod realm;
pub mod state;
pub mod unread;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{fmt, EnvFilter};

pub use backend::Backend;
pub use config::ClientConfig;
pub use error::{BackendError, SyncError, SyncResult};
pub use events::{ChatEvent, DomainEvent, EventBus, EventListener, MessageEvent, UserEvent};
pub use lock_table::{LockTable, SyncTaskKind, TaskKey, TaskState};
pub use orchestrator::{new_outgoing_message, SyncOrchestrator};
pub use realm::{Realm, RealmRegistry};
pub use state::ClientState;
pub use unread::{UnreadMap, UnreadTracker};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling it again is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client_lib=debug,parley_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Parley client logging initialised");
    }
}
