//! # parley-store
//!
//! Local mirror of users, chats and messages for the Parley client, backed
//! by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed load / save helpers for every
//! domain model, plus `merge_*` operations that reconcile a remote-fetched
//! collection with the stored one and commit every partition of the result
//! in a single transaction.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod users;

mod codec;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::MessageWindow;
