use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::{Message, MessageDirection, MessageState};

/// A [`Message`] as shown inside a chat: adds a direction and a read flag
/// tracked by this client. All other fields come from the wrapped message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    message: Message,
    direction: MessageDirection,
    read: bool,
}

impl ChatMessage {
    pub fn new(message: Message) -> Self {
        let read = message.is_read();
        Self::with_read(message, read)
    }

    pub fn with_read(message: Message, read: bool) -> Self {
        let direction = MessageDirection::from(message.state());
        Self {
            message,
            direction,
            read,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn direction(&self) -> MessageDirection {
        self.direction
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn mark_read(&self) -> ChatMessage {
        if self.read && self.message.is_read() {
            return self.clone();
        }
        Self {
            message: self.message.mark_read(),
            direction: self.direction,
            read: true,
        }
    }

    pub fn with_state(&self, state: MessageState) -> ChatMessage {
        Self {
            message: self.message.with_state(state),
            direction: self.direction,
            read: self.read,
        }
    }
}

impl Deref for ChatMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl From<Message> for ChatMessage {
    fn from(message: Message) -> Self {
        ChatMessage::new(message)
    }
}
