//! Sync orchestration.
//!
//! Every sync operation follows the same path: claim a single-flight slot,
//! fetch from the realm backend, merge into the store in one transaction,
//! refresh unread counts, publish events, return the merge result. A
//! backend failure aborts before anything is written.
//!
//! The database mutex is never held across an `.await`; each block that
//! touches the store locks, works and unlocks synchronously.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::constants::PROPERTY_REMOTE_ID;
use parley_shared::{
    derive_private_chat_id, ApiChat, Chat, ChatMessage, Entity, MergePolicy, MergeResult,
    Message, MessageState, Property, User,
};
use parley_store::Database;

use crate::error::{SyncError, SyncResult};
use crate::events::{ChatEvent, MessageEvent, UserEvent};
use crate::lock_table::{LockTable, SyncTaskKind, TaskKey, TaskState};
use crate::state::ClientState;
use crate::unread::UnreadTracker;

pub struct SyncOrchestrator {
    state: Arc<ClientState>,
    locks: LockTable,
    unread: UnreadTracker,
}

impl SyncOrchestrator {
    pub fn new(state: Arc<ClientState>) -> Self {
        Self {
            unread: UnreadTracker::new(Arc::clone(&state)),
            locks: LockTable::new(),
            state,
        }
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    pub fn task_state(&self, kind: SyncTaskKind, target: &Entity) -> TaskState {
        self.locks.state(&TaskKey::new(kind, target.clone()))
    }

    // ------------------------------------------------------------------
    // Sync operations
    // ------------------------------------------------------------------

    /// Reconcile the chat list of `user` with its backend. Chats flagged
    /// private are re-keyed to their derived id and the messages bundled
    /// with them are merged too.
    pub async fn sync_user_chats(&self, user: &Entity) -> SyncResult<MergeResult<Chat, Entity>> {
        self.run_task(SyncTaskKind::UserChats, user, self.user_chats(user))
            .await
    }

    pub async fn sync_user_contacts(&self, user: &Entity) -> SyncResult<MergeResult<User, Entity>> {
        self.run_task(SyncTaskKind::UserContacts, user, self.user_contacts(user))
            .await
    }

    /// Ask the backend which contacts of `user` are online and record every
    /// presence that changed. Returns the contacts whose flag flipped.
    pub async fn check_online_user_contacts(&self, user: &Entity) -> SyncResult<Vec<User>> {
        self.run_task(SyncTaskKind::OnlineContacts, user, self.online_contacts(user))
            .await
    }

    /// Merge the recent messages of every chat of `user`. Chats the store
    /// does not know yet are created. Returns the messages that were new.
    pub async fn sync_user_chat_messages(&self, user: &Entity) -> SyncResult<Vec<Message>> {
        self.run_task(
            SyncTaskKind::UserChatMessages,
            user,
            self.user_chat_messages(user),
        )
        .await
    }

    /// Fetch the messages sent after the newest stored one.
    pub async fn sync_newer_messages(&self, chat: &Entity) -> SyncResult<MergeResult<Message, Entity>> {
        self.run_task(SyncTaskKind::NewerMessages, chat, self.newer_messages(chat))
            .await
    }

    /// Fetch the page before the oldest stored message.
    pub async fn sync_older_messages(&self, chat: &Entity) -> SyncResult<MergeResult<Message, Entity>> {
        self.run_task(SyncTaskKind::OlderMessages, chat, self.older_messages(chat))
            .await
    }

    /// Bring one chat up to date and stamp its sync date.
    pub async fn sync_chat(&self, chat: &Entity) -> SyncResult<Chat> {
        self.run_task(SyncTaskKind::Chat, chat, self.chat(chat)).await
    }

    async fn run_task<T>(
        &self,
        kind: SyncTaskKind,
        target: &Entity,
        task: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        let slot = self.locks.try_acquire(TaskKey::new(kind, target.clone()))?;
        debug!(task = %slot.key(), "Sync task started");

        let outcome = task.await;
        match &outcome {
            Ok(_) => {
                debug!(task = %slot.key(), "Sync task completed");
                slot.complete();
            }
            Err(e) => {
                warn!(task = %slot.key(), error = %e, "Sync task failed");
                slot.fail();
            }
        }
        outcome
    }

    async fn user_chats(&self, user: &Entity) -> SyncResult<MergeResult<Chat, Entity>> {
        let realm = self.state.realms.get(user.realm_id())?;
        let api_chats = realm.backend().fetch_user_chats(user).await?;

        let mut chats = Vec::with_capacity(api_chats.len());
        let mut bundled = Vec::new();
        for api_chat in api_chats {
            let ApiChat {
                chat,
                messages,
                private,
            } = api_chat;
            let chat = if private { chat.to_private()? } else { chat };
            if !messages.is_empty() {
                bundled.push((chat.id().clone(), rebind(messages, chat.id())));
            }
            chats.push(chat);
        }

        let (result, message_results) = self
            .state
            .lock_database()?
            .merge_user_chats_with_messages(user, chats, bundled)?;

        self.publish_chat_merge(user, &result);
        for (chat_id, merged) in &message_results {
            self.publish_message_merge(chat_id, merged)?;
        }

        info!(
            user = %user,
            added = result.added.len(),
            updated = result.updated.len(),
            removed = result.removed.len(),
            "Synced user chats"
        );
        Ok(result)
    }

    async fn user_contacts(&self, user: &Entity) -> SyncResult<MergeResult<User, Entity>> {
        let realm = self.state.realms.get(user.realm_id())?;
        let contacts = realm.backend().fetch_user_contacts(user).await?;

        let result = self
            .state
            .lock_database()?
            .merge_user_contacts(user, contacts, MergePolicy::FULL)?;

        let events = &self.state.user_events;
        if !result.added.is_empty() {
            events.notify(UserEvent::ContactsAdded {
                user: user.clone(),
                contacts: result.added.clone(),
            });
        }
        if !result.removed.is_empty() {
            events.notify(UserEvent::ContactsRemoved {
                user: user.clone(),
                contacts: result.removed.clone(),
            });
        }
        for contact in &result.updated {
            events.notify(UserEvent::Changed(contact.clone()));
        }

        info!(
            user = %user,
            added = result.added.len(),
            updated = result.updated.len(),
            removed = result.removed.len(),
            "Synced user contacts"
        );
        Ok(result)
    }

    async fn online_contacts(&self, user: &Entity) -> SyncResult<Vec<User>> {
        let realm = self.state.realms.get(user.realm_id())?;
        let online: HashSet<Entity> = realm
            .backend()
            .fetch_online_user_contacts(user)
            .await?
            .into_iter()
            .collect();

        let contacts = self.state.lock_database()?.load_user_contacts(user)?;
        let mut flipped = Vec::new();
        for contact in contacts {
            let is_online = online.contains(contact.id());
            if let Some(updated) = self.on_contact_presence_changed(user, &contact, is_online)? {
                flipped.push(updated);
            }
        }

        info!(user = %user, online = online.len(), changed = flipped.len(), "Checked online contacts");
        Ok(flipped)
    }

    async fn user_chat_messages(&self, user: &Entity) -> SyncResult<Vec<Message>> {
        let realm = self.state.realms.get(user.realm_id())?;
        let fetched = realm.backend().fetch_user_chat_messages(user).await?;

        let (created, merged) = {
            let mut db = self.state.lock_database()?;

            let mut created = Vec::new();
            let mut by_chat: BTreeMap<Entity, Vec<Message>> = BTreeMap::new();
            for message in fetched {
                let (chat, is_new) = resolve_message_chat(&mut db, user, &message)?;
                if is_new {
                    created.push(chat.clone());
                }
                by_chat
                    .entry(chat.id().clone())
                    .or_default()
                    .push(message.with_chat(chat.id().clone()));
            }

            let mut merged = Vec::with_capacity(by_chat.len());
            for (chat_id, messages) in by_chat {
                let result = db.merge_chat_messages(&chat_id, messages)?;
                merged.push((chat_id, result));
            }
            (created, merged)
        };

        if !created.is_empty() {
            self.state.user_events.notify(UserEvent::ChatsAdded {
                user: user.clone(),
                chats: created,
            });
        }

        let mut added = Vec::new();
        for (chat_id, result) in &merged {
            self.publish_message_merge(chat_id, result)?;
            added.extend(result.added.iter().cloned());
        }

        info!(user = %user, chats = merged.len(), added = added.len(), "Synced user chat messages");
        Ok(added)
    }

    async fn newer_messages(&self, chat_id: &Entity) -> SyncResult<MergeResult<Message, Entity>> {
        let (chat, window) = {
            let db = self.state.lock_database()?;
            (load_chat(&db, chat_id)?, db.message_window(chat_id)?)
        };
        let realm = self.state.realms.get(chat_id.realm_id())?;

        let after = window.map(|w| w.newest);
        let fetched = realm
            .backend()
            .fetch_newer_messages(&chat.backend_id(), realm.user(), after)
            .await?;

        self.merge_messages(&chat, fetched)
    }

    async fn older_messages(&self, chat_id: &Entity) -> SyncResult<MergeResult<Message, Entity>> {
        let (chat, window) = {
            let db = self.state.lock_database()?;
            (load_chat(&db, chat_id)?, db.message_window(chat_id)?)
        };
        let realm = self.state.realms.get(chat_id.realm_id())?;

        let before = window.map(|w| w.oldest);
        let offset = window.map_or(0, |w| w.count);
        let fetched = realm
            .backend()
            .fetch_older_messages(&chat.backend_id(), realm.user(), before, offset)
            .await?;

        self.merge_messages(&chat, fetched)
    }

    async fn chat(&self, chat_id: &Entity) -> SyncResult<Chat> {
        self.sync_newer_messages(chat_id).await?;

        let empty = self.state.lock_database()?.message_window(chat_id)?.is_none();
        if empty {
            self.sync_older_messages(chat_id).await?;
        }

        let synced = {
            let mut db = self.state.lock_database()?;
            let chat = load_chat(&db, chat_id)?;
            db.save_chat(&chat.with_last_sync_date(Utc::now()))?
        };
        self.state
            .chat_events
            .notify(ChatEvent::Changed(synced.clone()));
        Ok(synced)
    }

    fn merge_messages(&self, chat: &Chat, fetched: Vec<Message>) -> SyncResult<MergeResult<Message, Entity>> {
        let messages = rebind(fetched, chat.id());
        let result = self
            .state
            .lock_database()?
            .merge_chat_messages(chat.id(), messages)?;
        self.publish_message_merge(chat.id(), &result)?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Persist `message` as sending and hand it to the realm backend.
    ///
    /// A backend that returns a server id confirms the message as sent. One
    /// that returns nothing leaves it sending, unless the realm (or the
    /// client config) treats acceptance as delivery. A backend error marks
    /// the message failed and is returned.
    pub async fn send_message(&self, chat_id: &Entity, message: &Message) -> SyncResult<Message> {
        let realm = self.state.realms.get(chat_id.realm_id())?;
        let (chat, sending) = {
            let db = self.state.lock_database()?;
            let chat = load_chat(&db, chat_id)?;
            let sending = message
                .with_chat(chat.id().clone())
                .with_state(MessageState::Sending);
            db.save_message(&sending)?;
            (chat, sending)
        };

        self.state
            .message_events
            .notify(MessageEvent::Sending(sending.clone()));
        self.state.chat_events.notify(ChatEvent::MessagesAdded {
            chat: chat.id().clone(),
            messages: vec![sending.clone()],
        });
        self.state.chat_events.notify(ChatEvent::LastMessageChanged {
            chat: chat.id().clone(),
            message: sending.clone(),
        });

        let outcome = realm
            .backend()
            .send_message(&chat, &ChatMessage::new(sending.clone()))
            .await;

        match outcome {
            Ok(remote_id) => {
                let confirmed = remote_id.is_some()
                    || realm
                        .notify_sent_immediately()
                        .unwrap_or(self.state.config.notify_sent_immediately);

                let mut sent = sending.clone();
                if let Some(id) = &remote_id {
                    sent = sent.with_properties(with_property(sent.properties(), PROPERTY_REMOTE_ID, id));
                }
                if confirmed {
                    sent = sent.with_state(MessageState::Sent);
                }
                if !Message::ptr_eq(&sent, &sending) {
                    self.state.lock_database()?.save_message(&sent)?;
                }

                info!(
                    chat = %chat.id(),
                    message = %sent.id(),
                    state = %sent.state(),
                    "Message handed to backend"
                );
                if confirmed {
                    self.state.message_events.notify(MessageEvent::Sent {
                        message: sent.clone(),
                        remote_id,
                    });
                    self.state.chat_events.notify(ChatEvent::MessageChanged {
                        chat: chat.id().clone(),
                        message: sent.clone(),
                    });
                }
                Ok(sent)
            }
            Err(e) => {
                warn!(chat = %chat.id(), message = %sending.id(), error = %e, "Failed to send message");
                let failed = sending.with_state(MessageState::Failed);
                self.state.lock_database()?.save_message(&failed)?;

                self.state
                    .message_events
                    .notify(MessageEvent::StateChanged(failed.clone()));
                self.state.chat_events.notify(ChatEvent::MessageChanged {
                    chat: chat.id().clone(),
                    message: failed,
                });
                Err(e.into())
            }
        }
    }

    /// A backend reported a new state for a stored message (delivery
    /// receipt, late send confirmation, remote deletion).
    pub fn on_message_state_changed(&self, message_id: &Entity, state: MessageState) -> SyncResult<Message> {
        let message = self
            .state
            .lock_database()?
            .update_message_state(message_id, state)?
            .ok_or_else(|| SyncError::MessageNotFound(message_id.clone()))?;

        debug!(message = %message_id, state = %state, "Message state changed");
        self.state
            .message_events
            .notify(MessageEvent::StateChanged(message.clone()));
        self.state.chat_events.notify(ChatEvent::MessageChanged {
            chat: message.chat().clone(),
            message: message.clone(),
        });
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// A realm reported that `contact` of `user` went online or offline.
    /// Returns the stored contact when its flag changed; a repeated report
    /// changes nothing and publishes nothing.
    pub fn on_contact_presence_changed(
        &self,
        user: &Entity,
        contact: &User,
        online: bool,
    ) -> SyncResult<Option<User>> {
        let updated = self
            .state
            .lock_database()?
            .update_contact_presence(user, contact, online)?;

        if let Some(contact) = &updated {
            debug!(user = %user, contact = %contact.id(), online, "Contact presence changed");
            let event = if online {
                UserEvent::ContactOnline {
                    user: user.clone(),
                    contact: contact.clone(),
                }
            } else {
                UserEvent::ContactOffline {
                    user: user.clone(),
                    contact: contact.clone(),
                }
            };
            self.state.user_events.notify(event);
        }
        Ok(updated)
    }

    /// Contacts of `user` as last reported online. Reads the store only.
    pub fn online_user_contacts(&self, user: &Entity) -> SyncResult<Vec<User>> {
        Ok(self.state.lock_database()?.load_online_user_contacts(user)?)
    }

    // ------------------------------------------------------------------
    // Private chats and realms
    // ------------------------------------------------------------------

    pub fn get_private_chat(&self, user1: &Entity, user2: &Entity) -> SyncResult<Option<Chat>> {
        let id = derive_private_chat_id(user1, user2);
        Ok(self.state.lock_database()?.load_chat(&id)?)
    }

    /// The private chat of `user1` and `user2`, created and added to the
    /// chat list of `user1` if it does not exist yet.
    pub fn get_or_create_private_chat(&self, user1: &Entity, user2: &Entity) -> SyncResult<Chat> {
        let chat = {
            let mut db = self.state.lock_database()?;
            if let Some(chat) = db.load_chat(&derive_private_chat_id(user1, user2))? {
                return Ok(chat);
            }
            let chat = db.save_chat(&Chat::new_private(user1, user2))?;
            db.link_user_chat(user1, chat.id())?;
            chat
        };

        info!(chat = %chat.id(), user = %user1, peer = %user2, "Created private chat");
        self.state.chat_events.notify(ChatEvent::Added(chat.clone()));
        self.state.user_events.notify(UserEvent::ChatsAdded {
            user: user1.clone(),
            chats: vec![chat.clone()],
        });
        Ok(chat)
    }

    /// Take the chats of `user` that hold no messages off its chat list.
    pub fn remove_empty_chats(&self, user: &Entity) -> SyncResult<Vec<Entity>> {
        let removed = self.state.lock_database()?.remove_empty_chats(user)?;
        if !removed.is_empty() {
            info!(user = %user, removed = removed.len(), "Removed empty chats");
            self.state.user_events.notify(UserEvent::ChatsRemoved {
                user: user.clone(),
                chats: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Forget a realm: its chats, messages, users and registration. Safe to
    /// call more than once.
    pub fn remove_realm(&self, realm_id: &str) -> SyncResult<()> {
        let (chats, users) = {
            let mut db = self.state.lock_database()?;
            let chats = db.remove_chats_in_account(realm_id)?;
            let users = db.remove_users_in_realm(realm_id)?;
            (chats, users)
        };
        let registered = self.state.realms.remove(realm_id).is_some();

        info!(realm = realm_id, chats, users, registered, "Removed realm");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn publish_chat_merge(&self, user: &Entity, result: &MergeResult<Chat, Entity>) {
        if !result.added.is_empty() {
            self.state.user_events.notify(UserEvent::ChatsAdded {
                user: user.clone(),
                chats: result.added.clone(),
            });
        }
        if !result.removed.is_empty() {
            self.state.user_events.notify(UserEvent::ChatsRemoved {
                user: user.clone(),
                chats: result.removed.clone(),
            });
        }
        for chat in &result.updated {
            self.state.chat_events.notify(ChatEvent::Changed(chat.clone()));
        }
    }

    fn publish_message_merge(&self, chat: &Entity, result: &MergeResult<Message, Entity>) -> SyncResult<()> {
        if result.added.is_empty() && result.updated.is_empty() {
            return Ok(());
        }

        let events = &self.state.chat_events;
        if !result.added.is_empty() {
            events.notify(ChatEvent::MessagesAdded {
                chat: chat.clone(),
                messages: result.added.clone(),
            });
        }
        for message in &result.updated {
            events.notify(ChatEvent::MessageChanged {
                chat: chat.clone(),
                message: message.clone(),
            });
        }

        let last = self.state.lock_database()?.last_message(chat)?;
        if let Some(last) = last {
            if result.added.iter().any(|m| m.id() == last.id()) {
                events.notify(ChatEvent::LastMessageChanged {
                    chat: chat.clone(),
                    message: last,
                });
            }
        }

        self.unread.refresh(chat)?;
        Ok(())
    }
}

/// A new outgoing message from `author` in `chat`, ready for
/// [`SyncOrchestrator::send_message`].
pub fn new_outgoing_message(chat: &Chat, author: &Entity, body: impl Into<String>) -> Message {
    let id = Entity::new(chat.id().realm_id(), Uuid::new_v4().to_string());
    let mut builder = Message::builder(id, author.clone(), chat.id().clone(), Utc::now())
        .body(body)
        .state(MessageState::Created);
    if let Some(peer) = chat.second_user(author) {
        builder = builder.recipient(peer.clone());
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_chat(db: &Database, id: &Entity) -> SyncResult<Chat> {
    db.load_chat(id)?
        .ok_or_else(|| SyncError::ChatNotFound(id.clone()))
}

/// Bind fetched messages to the local id of their chat.
fn rebind(messages: Vec<Message>, chat: &Entity) -> Vec<Message> {
    messages
        .into_iter()
        .map(|m| m.with_chat(chat.clone()))
        .collect()
}

fn with_property(properties: &[Property], name: &str, value: &str) -> Vec<Property> {
    let mut updated: Vec<Property> = properties
        .iter()
        .filter(|p| p.name != name)
        .cloned()
        .collect();
    updated.push(Property::new(name, value));
    updated
}

/// Find the stored chat a fetched message belongs to, creating it when the
/// store has never seen it. Returns the chat and whether it was created.
fn resolve_message_chat(db: &mut Database, user: &Entity, message: &Message) -> SyncResult<(Chat, bool)> {
    let backend_chat = message.chat();
    if let Some(chat) = db.load_chat(backend_chat)? {
        return Ok((chat, false));
    }
    if let Some(chat) =
        db.load_chat_by_remote_id(backend_chat.realm_id(), backend_chat.account_entity_id())?
    {
        return Ok((chat, false));
    }

    let chat = match message.second_user(user) {
        Some(peer) if message.is_private() => {
            let chat = Chat::new_private(user, peer);
            if chat.id() == backend_chat {
                chat
            } else {
                match db.load_chat(chat.id())? {
                    Some(existing) => return Ok((existing, false)),
                    None => chat.with_remote_id(backend_chat.account_entity_id()),
                }
            }
        }
        _ => {
            let mut participants = vec![user.clone(), message.author().clone()];
            participants.extend(message.recipient().cloned());
            Chat::new(backend_chat.clone(), participants)
        }
    };

    let chat = db.save_chat(&chat)?;
    db.link_user_chat(user, chat.id())?;
    debug!(chat = %chat.id(), user = %user, "Created chat for fetched message");
    Ok((chat, true))
}
