use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Message, Property};
use crate::constants::PRIVATE_CHAT_PARTICIPANTS;
use crate::error::ModelError;
use crate::identity::derive_private_chat_id;
use crate::merge::Mergeable;
use crate::types::Entity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ChatData {
    id: Entity,
    participants: BTreeSet<Entity>,
    last_sync_date: Option<DateTime<Utc>>,
    /// Id the backend uses for a chat whose local id was derived.
    remote_id: Option<String>,
    properties: Vec<Property>,
}

/// A conversation between a set of participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Chat {
    inner: Arc<ChatData>,
}

impl Chat {
    pub fn new(id: Entity, participants: impl IntoIterator<Item = Entity>) -> Self {
        Self::from_data(ChatData {
            id,
            participants: participants.into_iter().collect(),
            last_sync_date: None,
            remote_id: None,
            properties: Vec::new(),
        })
    }

    /// Empty private chat between two users, keyed by the derived id.
    pub fn new_private(user1: &Entity, user2: &Entity) -> Self {
        Self::new(
            derive_private_chat_id(user1, user2),
            [user1.clone(), user2.clone()],
        )
    }

    /// Re-key a chat received from a backend under its derived private id,
    /// remembering the backend's own id as `remote_id`.
    pub fn to_private(&self) -> Result<Chat, ModelError> {
        let participants: Vec<&Entity> = self.inner.participants.iter().collect();
        let [user1, user2] = participants.as_slice() else {
            return Err(ModelError::NotPrivate(participants.len()));
        };

        let id = derive_private_chat_id(user1, user2);
        if id == self.inner.id {
            return Ok(self.clone());
        }

        let remote_id = self
            .inner
            .remote_id
            .clone()
            .unwrap_or_else(|| self.inner.id.account_entity_id().to_string());
        Ok(Self::from_data(ChatData {
            id,
            remote_id: Some(remote_id),
            ..(*self.inner).clone()
        }))
    }

    fn from_data(data: ChatData) -> Self {
        Self {
            inner: Arc::new(data),
        }
    }

    pub fn ptr_eq(a: &Chat, b: &Chat) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn id(&self) -> &Entity {
        &self.inner.id
    }

    pub fn participants(&self) -> &BTreeSet<Entity> {
        &self.inner.participants
    }

    pub fn last_sync_date(&self) -> Option<DateTime<Utc>> {
        self.inner.last_sync_date
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.inner.remote_id.as_deref()
    }

    pub fn properties(&self) -> &[Property] {
        &self.inner.properties
    }

    /// Two participants and an id derived from them.
    pub fn is_private(&self) -> bool {
        if self.inner.participants.len() != PRIVATE_CHAT_PARTICIPANTS {
            return false;
        }
        let mut it = self.inner.participants.iter();
        match (it.next(), it.next()) {
            (Some(a), Some(b)) => derive_private_chat_id(a, b) == self.inner.id,
            _ => false,
        }
    }

    /// The participant of a private chat that is not `user`.
    pub fn second_user(&self, user: &Entity) -> Option<&Entity> {
        if !self.is_private() {
            return None;
        }
        self.inner.participants.iter().find(|p| *p != user)
    }

    /// The id to hand to the backend when talking about this chat.
    pub fn backend_id(&self) -> Entity {
        match &self.inner.remote_id {
            Some(remote) => Entity::new(self.inner.id.realm_id(), remote.clone()),
            None => self.inner.id.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Clone-on-write
    // ------------------------------------------------------------------

    pub fn with_last_sync_date(&self, date: DateTime<Utc>) -> Chat {
        if self.inner.last_sync_date == Some(date) {
            return self.clone();
        }
        self.modify(|c| c.last_sync_date = Some(date))
    }

    pub fn with_remote_id(&self, remote_id: impl Into<String>) -> Chat {
        let remote_id = remote_id.into();
        if self.inner.remote_id.as_deref() == Some(remote_id.as_str()) {
            return self.clone();
        }
        self.modify(|c| c.remote_id = Some(remote_id))
    }

    pub fn with_properties(&self, properties: Vec<Property>) -> Chat {
        if self.inner.properties == properties {
            return self.clone();
        }
        self.modify(|c| c.properties = properties)
    }

    /// Remote owns participants and properties; the later sync date wins;
    /// a known backend id is never dropped.
    pub fn merge_from(&self, remote: &Chat) -> Chat {
        if Chat::ptr_eq(self, remote) {
            return self.clone();
        }

        let local = &self.inner;
        let theirs = &remote.inner;
        let last_sync_date = local.last_sync_date.max(theirs.last_sync_date);
        let remote_id = theirs.remote_id.clone().or_else(|| local.remote_id.clone());
        if local.participants == theirs.participants
            && local.properties == theirs.properties
            && local.last_sync_date == last_sync_date
            && local.remote_id == remote_id
        {
            return self.clone();
        }

        self.modify(|c| {
            c.participants = theirs.participants.clone();
            c.properties = theirs.properties.clone();
            c.last_sync_date = last_sync_date;
            c.remote_id = remote_id;
        })
    }

    fn modify(&self, f: impl FnOnce(&mut ChatData)) -> Chat {
        let mut data = (*self.inner).clone();
        f(&mut data);
        Self::from_data(data)
    }
}

impl Mergeable for Chat {
    fn merge_from(&self, remote: &Self) -> Self {
        Chat::merge_from(self, remote)
    }
}

/// A chat as returned by a backend, with the messages it bundled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiChat {
    pub chat: Chat,
    pub messages: Vec<Message>,
    /// The backend reports this as a one-to-one chat; its id gets replaced
    /// by the derived private chat id before it is stored.
    pub private: bool,
}

impl ApiChat {
    pub fn new(chat: Chat) -> Self {
        Self {
            chat,
            messages: Vec::new(),
            private: false,
        }
    }

    pub fn private(chat: Chat) -> Self {
        Self {
            chat,
            messages: Vec::new(),
            private: true,
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn alice() -> Entity {
        Entity::new("xmpp", "alice")
    }

    fn bob() -> Entity {
        Entity::new("xmpp", "bob")
    }

    #[test]
    fn test_new_private_is_private() {
        let chat = Chat::new_private(&alice(), &bob());
        assert!(chat.is_private());
        assert_eq!(chat.second_user(&alice()), Some(&bob()));
        assert_eq!(chat.id(), Chat::new_private(&bob(), &alice()).id());
    }

    #[test]
    fn test_to_private_keeps_backend_id() {
        let remote = Chat::new(Entity::new("xmpp", "thread-17"), [alice(), bob()]);
        assert!(!remote.is_private());

        let private = remote.to_private().unwrap();
        assert!(private.is_private());
        assert_eq!(private.remote_id(), Some("thread-17"));
        assert_eq!(private.backend_id(), Entity::new("xmpp", "thread-17"));

        let again = private.to_private().unwrap();
        assert!(Chat::ptr_eq(&again, &private));
    }

    #[test]
    fn test_to_private_rejects_group() {
        let group = Chat::new(
            Entity::new("xmpp", "room"),
            [alice(), bob(), Entity::new("xmpp", "carol")],
        );
        assert_eq!(group.to_private(), Err(ModelError::NotPrivate(3)));
    }

    #[test]
    fn test_merge_from_keeps_latest_sync_date() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let local = Chat::new_private(&alice(), &bob()).with_last_sync_date(late);
        let remote = Chat::new_private(&alice(), &bob()).with_last_sync_date(early);

        let merged = local.merge_from(&remote);
        assert!(Chat::ptr_eq(&merged, &local));
        assert_eq!(merged.last_sync_date(), Some(late));
    }

    #[test]
    fn test_merge_from_takes_remote_properties() {
        let local = Chat::new(Entity::new("xmpp", "room"), [alice()]);
        let remote = local.with_properties(vec![Property::new("title", "Room")]);
        let merged = local.merge_from(&remote);
        assert_eq!(merged.properties(), remote.properties());
        assert!(local.properties().is_empty());
    }
}
