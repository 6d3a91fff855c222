//! Scripted backend and fixtures shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use parley_shared::{ApiChat, Chat, ChatMessage, Entity, Message, MessageState, User};

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::BackendError;
use crate::state::ClientState;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UserChats(Entity),
    UserContacts(Entity),
    UserChatMessages(Entity),
    Newer {
        chat: Entity,
        after: Option<DateTime<Utc>>,
    },
    Older {
        chat: Entity,
        before: Option<DateTime<Utc>>,
        offset: usize,
    },
    Send {
        chat: Entity,
        message: Entity,
    },
}

/// Returns whatever the test put in its fields and records every call.
/// While a test holds `gate`, every call blocks.
#[derive(Default)]
pub struct FakeBackend {
    pub chats: Mutex<Vec<ApiChat>>,
    pub contacts: Mutex<Vec<User>>,
    pub user_messages: Mutex<Vec<Message>>,
    pub newer: Mutex<Vec<Message>>,
    pub older: Mutex<Vec<Message>>,
    pub send_reply: Mutex<Option<String>>,
    pub failure: Mutex<Option<BackendError>>,
    pub calls: Mutex<Vec<Call>>,
    pub gate: tokio::sync::Mutex<()>,
}

impl FakeBackend {
    pub fn fail_with(&self, error: BackendError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn enter(&self, call: Call) -> Result<(), BackendError> {
        drop(self.gate.lock().await);
        self.calls.lock().unwrap().push(call);
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_user_chats(&self, user: &Entity) -> Result<Vec<ApiChat>, BackendError> {
        self.enter(Call::UserChats(user.clone())).await?;
        let chats = self.chats.lock().unwrap().clone();
        Ok(chats)
    }

    async fn fetch_user_contacts(&self, user: &Entity) -> Result<Vec<User>, BackendError> {
        self.enter(Call::UserContacts(user.clone())).await?;
        let contacts = self.contacts.lock().unwrap().clone();
        Ok(contacts)
    }

    async fn fetch_user_chat_messages(&self, user: &Entity) -> Result<Vec<Message>, BackendError> {
        self.enter(Call::UserChatMessages(user.clone())).await?;
        let messages = self.user_messages.lock().unwrap().clone();
        Ok(messages)
    }

    async fn fetch_newer_messages(
        &self,
        chat: &Entity,
        _user: &Entity,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError> {
        self.enter(Call::Newer {
            chat: chat.clone(),
            after,
        })
        .await?;
        let messages = self.newer.lock().unwrap().clone();
        Ok(messages)
    }

    async fn fetch_older_messages(
        &self,
        chat: &Entity,
        _user: &Entity,
        before: Option<DateTime<Utc>>,
        offset: usize,
    ) -> Result<Vec<Message>, BackendError> {
        self.enter(Call::Older {
            chat: chat.clone(),
            before,
            offset,
        })
        .await?;
        let messages = self.older.lock().unwrap().clone();
        Ok(messages)
    }

    async fn send_message(
        &self,
        chat: &Chat,
        message: &ChatMessage,
    ) -> Result<Option<String>, BackendError> {
        self.enter(Call::Send {
            chat: chat.backend_id(),
            message: message.id().clone(),
        })
        .await?;
        let reply = self.send_reply.lock().unwrap().clone();
        Ok(reply)
    }
}

pub fn open_state() -> (tempfile::TempDir, Arc<ClientState>) {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig::default().with_database_path(dir.path().join("client.db"));
    let state = ClientState::open(config).unwrap();
    (dir, state)
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

pub fn me(realm: &str) -> Entity {
    Entity::new(realm, "me")
}

pub fn bob(realm: &str) -> Entity {
    Entity::new(realm, "bob")
}

/// A message from bob to me in `chat`.
pub fn incoming(id: &str, chat: &Entity, hour: u32, minute: u32) -> Message {
    let realm = chat.realm_id();
    Message::builder(Entity::new(realm, id), bob(realm), chat.clone(), at(hour, minute))
        .recipient(me(realm))
        .body(format!("hello {id}"))
        .state(MessageState::Received)
        .build()
}

/// A message from me to bob in `chat`.
pub fn outgoing(id: &str, chat: &Entity, hour: u32, minute: u32) -> Message {
    let realm = chat.realm_id();
    Message::builder(Entity::new(realm, id), me(realm), chat.clone(), at(hour, minute))
        .recipient(bob(realm))
        .body(format!("reply {id}"))
        .state(MessageState::Sent)
        .build()
}
