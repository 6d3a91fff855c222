//! The network side of a realm.
//!
//! A backend fetches remote collections and delivers outgoing messages. It
//! never touches local storage; everything it returns is merged by the
//! [`SyncOrchestrator`](crate::orchestrator::SyncOrchestrator).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_shared::{ApiChat, Chat, ChatMessage, Entity, Message, User};

use crate::error::BackendError;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Complete chat list of `user`. Private chats are flagged on the
    /// returned [`ApiChat`] and may carry a first page of messages.
    async fn fetch_user_chats(&self, user: &Entity) -> Result<Vec<ApiChat>, BackendError>;

    /// Complete contact list of `user`.
    async fn fetch_user_contacts(&self, _user: &Entity) -> Result<Vec<User>, BackendError> {
        Ok(Vec::new())
    }

    /// Contacts of `user` that are online right now. Backends without a
    /// dedicated presence query answer from the contact list.
    async fn fetch_online_user_contacts(&self, user: &Entity) -> Result<Vec<Entity>, BackendError> {
        Ok(self
            .fetch_user_contacts(user)
            .await?
            .into_iter()
            .filter(User::is_online)
            .map(|contact| contact.id().clone())
            .collect())
    }

    /// Recent messages across every chat of `user`.
    async fn fetch_user_chat_messages(&self, _user: &Entity) -> Result<Vec<Message>, BackendError> {
        Ok(Vec::new())
    }

    /// Messages of `chat` sent strictly after `after`, or the latest page
    /// when `after` is `None`. `chat` is the id the backend knows the chat by.
    async fn fetch_newer_messages(
        &self,
        chat: &Entity,
        user: &Entity,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError>;

    /// Messages of `chat` sent before `before`. `offset` is the number of
    /// messages already stored locally.
    async fn fetch_older_messages(
        &self,
        chat: &Entity,
        user: &Entity,
        before: Option<DateTime<Utc>>,
        offset: usize,
    ) -> Result<Vec<Message>, BackendError>;

    /// Deliver `message`. Returns the server-assigned id when the backend
    /// reports one.
    async fn send_message(
        &self,
        chat: &Chat,
        message: &ChatMessage,
    ) -> Result<Option<String>, BackendError>;
}
