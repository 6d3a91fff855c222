//! # parley-shared
//!
//! Types shared by every Parley crate: realm-scoped [`Entity`] identifiers,
//! the immutable message / chat / user model and the generic merge engine
//! used to reconcile remote collections with local state.

pub mod constants;
pub mod error;
pub mod identity;
pub mod merge;
pub mod model;
pub mod types;

pub use error::ModelError;
pub use identity::derive_private_chat_id;
pub use merge::{merge, MergePolicy, MergeResult, Mergeable};
pub use model::*;
pub use types::Entity;
