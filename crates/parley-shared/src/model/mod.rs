//! Immutable domain model.
//!
//! [`Message`], [`Chat`] and [`User`] are cheap-to-clone handles around
//! shared, never-mutated data. Every `with_*` / `mark_*` / `merge_from`
//! operation produces a new handle, or hands back the very same handle
//! (see `ptr_eq`) when the change would be a no-op, so downstream
//! consumers can skip work for values that did not change.

mod chat;
mod chat_message;
mod message;
mod user;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub use chat::{ApiChat, Chat};
pub use chat_message::ChatMessage;
pub use message::{count_unread, Message, MessageBuilder};
pub use user::User;

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// Free-form key/value attached to messages, chats and users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Value of the first property called `name`.
pub fn property_value<'a>(properties: &'a [Property], name: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.value.as_str())
}

// ---------------------------------------------------------------------------
// MessageState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    /// Composed locally, not yet handed to a backend.
    Created,
    Queued,
    Sending,
    Sent,
    Delivered,
    Failed,
    /// Received from another user.
    Received,
    Removed,
}

impl MessageState {
    pub const ALL: [MessageState; 8] = [
        MessageState::Created,
        MessageState::Queued,
        MessageState::Sending,
        MessageState::Sent,
        MessageState::Delivered,
        MessageState::Failed,
        MessageState::Received,
        MessageState::Removed,
    ];

    pub fn is_outgoing(self) -> bool {
        matches!(
            self,
            MessageState::Created
                | MessageState::Queued
                | MessageState::Sending
                | MessageState::Sent
                | MessageState::Delivered
                | MessageState::Failed
        )
    }

    pub fn is_incoming(self) -> bool {
        matches!(self, MessageState::Received)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageState::Created => "created",
            MessageState::Queued => "queued",
            MessageState::Sending => "sending",
            MessageState::Sent => "sent",
            MessageState::Delivered => "delivered",
            MessageState::Failed => "failed",
            MessageState::Received => "received",
            MessageState::Removed => "removed",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ModelError::UnknownMessageState(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MessageDirection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    In,
    Out,
}

impl From<MessageState> for MessageDirection {
    fn from(state: MessageState) -> Self {
        if state.is_outgoing() {
            MessageDirection::Out
        } else {
            MessageDirection::In
        }
    }
}
