//! Change notifications.
//!
//! Every bus delivers its events in the order they were notified. A
//! listener that notifies from inside its callback has the new event
//! queued behind the current one instead of delivered recursively.
//! Listeners run on whichever thread called [`EventBus::notify`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use parley_shared::{Chat, Entity, Message, User};

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

pub trait EventListener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

struct BusState<E> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
    queue: VecDeque<E>,
    draining: bool,
}

pub struct EventBus<E> {
    state: Mutex<BusState<E>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                listeners: Vec::new(),
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Returns `false` if `listener` is already registered.
    pub fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> bool {
        let mut state = self.lock();
        if state.listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        state.listeners.push(listener);
        true
    }

    /// Returns `false` if `listener` was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener<E>>) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|l| !same_listener(l, listener));
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn notify(&self, event: E) {
        {
            let mut state = self.lock();
            state.queue.push_back(event);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let mut drain = DrainGuard {
            bus: self,
            armed: true,
        };
        loop {
            let (event, listeners) = {
                let mut state = self.lock();
                match state.queue.pop_front() {
                    Some(event) => (event, state.listeners.clone()),
                    None => {
                        state.draining = false;
                        drain.armed = false;
                        return;
                    }
                }
            };
            for listener in &listeners {
                listener.on_event(&event);
            }
        }
    }

    // The state is only touched in short, non-panicking sections.
    fn lock(&self) -> MutexGuard<'_, BusState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventBus")
            .field("listeners", &state.listeners.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Clears the draining flag when a listener panics. Events still queued
/// go out with the next `notify`.
struct DrainGuard<'a, E> {
    bus: &'a EventBus<E>,
    armed: bool,
}

impl<E> Drop for DrainGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            self.bus.lock().draining = false;
        }
    }
}

fn same_listener<E>(a: &Arc<dyn EventListener<E>>, b: &Arc<dyn EventListener<E>>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

// ---------------------------------------------------------------------------
// Domain events
// ---------------------------------------------------------------------------

pub trait DomainEvent {
    /// The entity the event is about.
    fn target(&self) -> &Entity;
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    Added(Chat),
    Changed(Chat),
    MessagesAdded { chat: Entity, messages: Vec<Message> },
    MessageChanged { chat: Entity, message: Message },
    LastMessageChanged { chat: Entity, message: Message },
    UnreadCountChanged { chat: Entity, count: usize },
}

impl DomainEvent for ChatEvent {
    fn target(&self) -> &Entity {
        match self {
            ChatEvent::Added(chat) | ChatEvent::Changed(chat) => chat.id(),
            ChatEvent::MessagesAdded { chat, .. }
            | ChatEvent::MessageChanged { chat, .. }
            | ChatEvent::LastMessageChanged { chat, .. }
            | ChatEvent::UnreadCountChanged { chat, .. } => chat,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserEvent {
    Changed(User),
    ContactsAdded { user: Entity, contacts: Vec<User> },
    ContactsRemoved { user: Entity, contacts: Vec<Entity> },
    ContactOnline { user: Entity, contact: User },
    ContactOffline { user: Entity, contact: User },
    ChatsAdded { user: Entity, chats: Vec<Chat> },
    ChatsRemoved { user: Entity, chats: Vec<Entity> },
}

impl DomainEvent for UserEvent {
    fn target(&self) -> &Entity {
        match self {
            UserEvent::Changed(user) => user.id(),
            UserEvent::ContactOnline { contact, .. } | UserEvent::ContactOffline { contact, .. } => {
                contact.id()
            }
            UserEvent::ContactsAdded { user, .. }
            | UserEvent::ContactsRemoved { user, .. }
            | UserEvent::ChatsAdded { user, .. }
            | UserEvent::ChatsRemoved { user, .. } => user,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageEvent {
    Sending(Message),
    Sent {
        message: Message,
        remote_id: Option<String>,
    },
    StateChanged(Message),
    Read(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Sending(message)
            | MessageEvent::StateChanged(message)
            | MessageEvent::Read(message)
            | MessageEvent::Sent { message, .. } => message,
        }
    }
}

impl DomainEvent for MessageEvent {
    fn target(&self) -> &Entity {
        self.message().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, Arc<dyn EventListener<u32>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn EventListener<u32>> =
            Arc::new(move |e: &u32| sink.lock().unwrap().push(*e));
        (seen, listener)
    }

    #[test]
    fn test_add_listener_twice_is_rejected() {
        let bus = EventBus::new();
        let (_, listener) = recorder();
        assert!(bus.add_listener(Arc::clone(&listener)));
        assert!(!bus.add_listener(Arc::clone(&listener)));
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_remove_listener_is_idempotent() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.add_listener(Arc::clone(&listener));

        assert!(bus.remove_listener(&listener));
        assert!(!bus.remove_listener(&listener));

        bus.notify(1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_events_delivered_in_order() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.add_listener(listener);

        for e in [3, 1, 2] {
            bus.notify(e);
        }
        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn test_reentrant_notify_is_queued() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Each listener sees event 1 before the follow-up event 10
        // raised while 1 was being delivered.
        let relay_bus = Arc::clone(&bus);
        let relay_seen = Arc::clone(&seen);
        bus.add_listener(Arc::new(move |e: &u32| {
            relay_seen.lock().unwrap().push(("relay", *e));
            if *e == 1 {
                relay_bus.notify(10);
            }
        }));
        let tail_seen = Arc::clone(&seen);
        bus.add_listener(Arc::new(move |e: &u32| {
            tail_seen.lock().unwrap().push(("tail", *e));
        }));

        bus.notify(1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("relay", 1), ("tail", 1), ("relay", 10), ("tail", 10)]
        );
    }

    #[test]
    fn test_event_targets() {
        let chat = Entity::new("xmpp", "room");
        let event = ChatEvent::UnreadCountChanged {
            chat: chat.clone(),
            count: 2,
        };
        assert_eq!(event.target(), &chat);

        let user = User::new(Entity::new("xmpp", "bob"), "Bob");
        assert_eq!(UserEvent::Changed(user).target(), &Entity::new("xmpp", "bob"));
    }
}
