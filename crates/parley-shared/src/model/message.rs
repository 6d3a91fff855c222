use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageState, Property};
use crate::merge::Mergeable;
use crate::types::Entity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct MessageData {
    id: Entity,
    author: Entity,
    recipient: Option<Entity>,
    chat: Entity,
    send_date: DateTime<Utc>,
    title: String,
    body: String,
    state: MessageState,
    read: bool,
    properties: Vec<Property>,
}

/// A chat message.
///
/// `id`, `author`, `recipient`, `chat` and `send_date` are fixed at
/// creation; the remaining fields change only through operations that
/// return a new `Message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Message {
    inner: Arc<MessageData>,
}

impl Message {
    pub fn builder(id: Entity, author: Entity, chat: Entity, send_date: DateTime<Utc>) -> MessageBuilder {
        MessageBuilder {
            data: MessageData {
                id,
                author,
                recipient: None,
                chat,
                send_date,
                title: String::new(),
                body: String::new(),
                state: MessageState::Created,
                read: false,
                properties: Vec::new(),
            },
        }
    }

    /// True if both handles point at the same underlying value.
    pub fn ptr_eq(a: &Message, b: &Message) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn id(&self) -> &Entity {
        &self.inner.id
    }

    pub fn author(&self) -> &Entity {
        &self.inner.author
    }

    pub fn recipient(&self) -> Option<&Entity> {
        self.inner.recipient.as_ref()
    }

    pub fn chat(&self) -> &Entity {
        &self.inner.chat
    }

    pub fn send_date(&self) -> DateTime<Utc> {
        self.inner.send_date
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn body(&self) -> &str {
        &self.inner.body
    }

    pub fn state(&self) -> MessageState {
        self.inner.state
    }

    pub fn is_read(&self) -> bool {
        self.inner.read
    }

    pub fn properties(&self) -> &[Property] {
        &self.inner.properties
    }

    pub fn is_incoming(&self) -> bool {
        self.inner.state.is_incoming()
    }

    pub fn is_outgoing(&self) -> bool {
        self.inner.state.is_outgoing()
    }

    /// Incoming and not read yet.
    pub fn can_read(&self) -> bool {
        self.is_incoming() && !self.is_read()
    }

    /// A message addressed to one other user.
    pub fn is_private(&self) -> bool {
        matches!(&self.inner.recipient, Some(r) if *r != self.inner.author)
    }

    /// The other party of a private message, seen from `user`.
    pub fn second_user(&self, user: &Entity) -> Option<&Entity> {
        if *user == self.inner.author {
            self.inner.recipient.as_ref()
        } else if self.inner.recipient.as_ref() == Some(user) {
            Some(&self.inner.author)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Clone-on-write
    // ------------------------------------------------------------------

    pub fn with_state(&self, state: MessageState) -> Message {
        if self.inner.state == state {
            return self.clone();
        }
        self.modify(|m| m.state = state)
    }

    /// Rebind the message to another chat. Only meant for messages that
    /// have not been persisted yet (e.g. backend chat id -> derived id).
    pub fn with_chat(&self, chat: Entity) -> Message {
        if self.inner.chat == chat {
            return self.clone();
        }
        self.modify(|m| m.chat = chat)
    }

    pub fn with_properties(&self, properties: Vec<Property>) -> Message {
        if self.inner.properties == properties {
            return self.clone();
        }
        self.modify(|m| m.properties = properties)
    }

    pub fn mark_read(&self) -> Message {
        if self.inner.read {
            return self.clone();
        }
        self.modify(|m| m.read = true)
    }

    /// Fold a freshly fetched copy of this message into the local one.
    ///
    /// Remote owns the content (`state`, `title`, `body`, `properties`);
    /// `read` only ever goes from false to true; authorship fields always
    /// stay as they are locally.
    pub fn merge_from(&self, remote: &Message) -> Message {
        if Message::ptr_eq(self, remote) {
            return self.clone();
        }

        let local = &self.inner;
        let theirs = &remote.inner;
        let read = local.read || theirs.read;
        if local.state == theirs.state
            && local.title == theirs.title
            && local.body == theirs.body
            && local.properties == theirs.properties
            && local.read == read
        {
            return self.clone();
        }

        self.modify(|m| {
            m.read = read;
            m.state = theirs.state;
            m.title = theirs.title.clone();
            m.body = theirs.body.clone();
            m.properties = theirs.properties.clone();
        })
    }

    fn modify(&self, f: impl FnOnce(&mut MessageData)) -> Message {
        let mut data = (*self.inner).clone();
        f(&mut data);
        Message {
            inner: Arc::new(data),
        }
    }
}

impl Mergeable for Message {
    fn merge_from(&self, remote: &Self) -> Self {
        Message::merge_from(self, remote)
    }
}

/// Number of incoming messages not read yet.
pub fn count_unread<'a>(messages: impl IntoIterator<Item = &'a Message>) -> usize {
    messages.into_iter().filter(|m| m.can_read()).count()
}

/// Builder for new [`Message`] values.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    data: MessageData,
}

impl MessageBuilder {
    pub fn recipient(mut self, recipient: Entity) -> Self {
        self.data.recipient = Some(recipient);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.data.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.data.body = body.into();
        self
    }

    pub fn state(mut self, state: MessageState) -> Self {
        self.data.state = state;
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.data.read = read;
        self
    }

    pub fn properties(mut self, properties: Vec<Property>) -> Self {
        self.data.properties = properties;
        self
    }

    pub fn build(self) -> Message {
        Message {
            inner: Arc::new(self.data),
        }
    }
}
