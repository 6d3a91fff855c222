//! Unread bookkeeping.
//!
//! Counts are derived from stored messages on every call and never cached:
//! a chat's unread count is the number of incoming messages not yet read.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use parley_shared::{Entity, Message};

use crate::error::{SyncError, SyncResult};
use crate::events::{ChatEvent, MessageEvent};
use crate::state::ClientState;

/// Unread count per chat. Only chats with at least one unread message
/// appear.
pub type UnreadMap = HashMap<Entity, usize>;

#[derive(Clone)]
pub struct UnreadTracker {
    state: Arc<ClientState>,
}

impl UnreadTracker {
    pub fn new(state: Arc<ClientState>) -> Self {
        Self { state }
    }

    pub fn unread_count(&self, chat: &Entity) -> SyncResult<usize> {
        Ok(self.state.lock_database()?.unread_count(chat)?)
    }

    pub fn unread_chats(&self) -> SyncResult<UnreadMap> {
        Ok(self.state.lock_database()?.unread_counts()?)
    }

    /// Mark `message` read, persist it and publish the new unread count of
    /// its chat. Reading an already read message changes nothing and
    /// publishes nothing. Counts and events follow the chat the message is
    /// stored in, whatever `chat` says.
    pub fn on_message_read(&self, chat: &Entity, message: &Message) -> SyncResult<Message> {
        let (read, count) = {
            let db = self.state.lock_database()?;
            let stored = db
                .load_message(message.id())?
                .ok_or_else(|| SyncError::MessageNotFound(message.id().clone()))?;

            let read = stored.mark_read();
            if Message::ptr_eq(&read, &stored) {
                return Ok(stored);
            }
            db.save_message(&read)?;
            let count = db.unread_count(read.chat())?;
            (read, count)
        };

        let chat_id = read.chat().clone();
        if &chat_id != chat {
            warn!(given = %chat, actual = %chat_id, message = %read.id(), "Read message belongs to another chat");
        }
        debug!(chat = %chat_id, message = %read.id(), unread = count, "Message read");

        self.state
            .message_events
            .notify(MessageEvent::Read(read.clone()));
        self.state.chat_events.notify(ChatEvent::MessageChanged {
            chat: chat_id.clone(),
            message: read.clone(),
        });
        self.state.chat_events.notify(ChatEvent::UnreadCountChanged {
            chat: chat_id,
            count,
        });
        Ok(read)
    }

    /// Recount `chat` and publish the result.
    pub fn refresh(&self, chat: &Entity) -> SyncResult<usize> {
        let count = self.unread_count(chat)?;
        self.state.chat_events.notify(ChatEvent::UnreadCountChanged {
            chat: chat.clone(),
            count,
        });
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use parley_shared::{Chat, MessageState};

    use super::*;
    use crate::events::EventListener;
    use crate::test_support::{incoming, open_state, outgoing};

    fn room() -> Chat {
        Chat::new(
            Entity::new("xmpp", "room"),
            [Entity::new("xmpp", "me"), Entity::new("xmpp", "bob")],
        )
    }

    fn seed(state: &ClientState, messages: &[Message]) {
        let mut db = state.lock_database().unwrap();
        db.save_chat(&room()).unwrap();
        db.merge_chat_messages(room().id(), messages.to_vec()).unwrap();
    }

    #[test]
    fn test_unread_count_only_counts_incoming() {
        let (_dir, state) = open_state();
        seed(
            &state,
            &[
                incoming("m1", room().id(), 10, 0),
                incoming("m2", room().id(), 10, 5),
                outgoing("m3", room().id(), 10, 10),
            ],
        );

        let tracker = UnreadTracker::new(Arc::clone(&state));
        assert_eq!(tracker.unread_count(room().id()).unwrap(), 2);
        assert_eq!(tracker.unread_chats().unwrap().get(room().id()), Some(&2));
    }

    #[test]
    fn test_on_message_read_publishes_new_count() {
        let (_dir, state) = open_state();
        let first = incoming("m1", room().id(), 10, 0);
        seed(&state, &[first.clone(), incoming("m2", room().id(), 10, 5)]);

        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        let listener: Arc<dyn EventListener<ChatEvent>> = Arc::new(move |e: &ChatEvent| {
            if let ChatEvent::UnreadCountChanged { count, .. } = e {
                sink.lock().unwrap().push(*count);
            }
        });
        state.chat_events.add_listener(listener);

        let tracker = UnreadTracker::new(Arc::clone(&state));
        let read = tracker.on_message_read(room().id(), &first).unwrap();
        assert!(read.is_read());
        assert_eq!(read.state(), MessageState::Received);

        // Second read is a no-op.
        tracker.on_message_read(room().id(), &first).unwrap();

        assert_eq!(*counts.lock().unwrap(), vec![1]);
        assert_eq!(tracker.unread_count(room().id()).unwrap(), 1);
    }

    #[test]
    fn test_read_with_wrong_chat_updates_owning_chat() {
        let (_dir, state) = open_state();
        let first = incoming("m1", room().id(), 10, 0);
        seed(&state, &[first.clone(), incoming("m2", room().id(), 10, 5)]);

        let targets = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&targets);
        let listener: Arc<dyn EventListener<ChatEvent>> = Arc::new(move |e: &ChatEvent| {
            if let ChatEvent::UnreadCountChanged { chat, count } = e {
                sink.lock().unwrap().push((chat.clone(), *count));
            }
        });
        state.chat_events.add_listener(listener);

        let tracker = UnreadTracker::new(Arc::clone(&state));
        let elsewhere = Entity::new("xmpp", "elsewhere");
        tracker.on_message_read(&elsewhere, &first).unwrap();

        assert_eq!(*targets.lock().unwrap(), vec![(room().id().clone(), 1)]);
        assert_eq!(tracker.unread_count(room().id()).unwrap(), 1);
    }

    #[test]
    fn test_read_unknown_message_fails() {
        let (_dir, state) = open_state();
        let tracker = UnreadTracker::new(state);
        let ghost = incoming("ghost", room().id(), 9, 0);
        assert!(matches!(
            tracker.on_message_read(room().id(), &ghost),
            Err(SyncError::MessageNotFound(_))
        ));
    }
}
