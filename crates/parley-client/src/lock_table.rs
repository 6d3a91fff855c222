//! Single-flight bookkeeping for sync tasks.
//!
//! At most one task runs per (kind, target) pair. Distinct pairs never
//! block each other. A slot is released by [`TaskSlot::complete`],
//! [`TaskSlot::fail`], or by being dropped (a cancelled task counts as
//! failed).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_shared::Entity;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTaskKind {
    UserChats,
    UserContacts,
    OnlineContacts,
    UserChatMessages,
    NewerMessages,
    OlderMessages,
    Chat,
}

impl SyncTaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncTaskKind::UserChats => "user_chats",
            SyncTaskKind::UserContacts => "user_contacts",
            SyncTaskKind::OnlineContacts => "online_contacts",
            SyncTaskKind::UserChatMessages => "user_chat_messages",
            SyncTaskKind::NewerMessages => "newer_messages",
            SyncTaskKind::OlderMessages => "older_messages",
            SyncTaskKind::Chat => "chat",
        }
    }
}

impl fmt::Display for SyncTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one single-flight slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub kind: SyncTaskKind,
    pub target: Entity,
}

impl TaskKey {
    pub fn new(kind: SyncTaskKind, target: Entity) -> Self {
        Self { kind, target }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Default)]
pub struct LockTable {
    tasks: Mutex<HashMap<TaskKey, TaskState>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`, or fail with
    /// [`SyncError::TaskAlreadyRunning`] if it is taken.
    pub fn try_acquire(&self, key: TaskKey) -> SyncResult<TaskSlot<'_>> {
        let mut tasks = self.tasks();
        if tasks.get(&key) == Some(&TaskState::Running) {
            return Err(SyncError::TaskAlreadyRunning(key));
        }
        tasks.insert(key.clone(), TaskState::Running);
        Ok(TaskSlot {
            table: self,
            key,
            released: false,
        })
    }

    /// Last known state of `key`; `Idle` if it never ran.
    pub fn state(&self, key: &TaskKey) -> TaskState {
        self.tasks().get(key).copied().unwrap_or(TaskState::Idle)
    }

    pub fn running(&self) -> Vec<TaskKey> {
        self.tasks()
            .iter()
            .filter(|(_, state)| **state == TaskState::Running)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn release(&self, key: &TaskKey, state: TaskState) {
        self.tasks().insert(key.clone(), state);
    }

    // Every critical section is a single map operation, so the map is
    // consistent even if a holder panicked.
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskState>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A claimed slot. Releases itself as failed when dropped unreleased.
#[derive(Debug)]
pub struct TaskSlot<'a> {
    table: &'a LockTable,
    key: TaskKey,
    released: bool,
}

impl TaskSlot<'_> {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn complete(mut self) {
        self.finish(TaskState::Completed);
    }

    pub fn fail(mut self) {
        self.finish(TaskState::Failed);
    }

    fn finish(&mut self, state: TaskState) {
        if !self.released {
            self.table.release(&self.key, state);
            self.released = true;
        }
    }
}

impl Drop for TaskSlot<'_> {
    fn drop(&mut self) {
        self.finish(TaskState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: SyncTaskKind, id: &str) -> TaskKey {
        TaskKey::new(kind, Entity::new("xmpp", id))
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let table = LockTable::new();
        let slot = table.try_acquire(key(SyncTaskKind::UserChats, "u1")).unwrap();

        let err = table
            .try_acquire(key(SyncTaskKind::UserChats, "u1"))
            .unwrap_err();
        assert!(matches!(err, SyncError::TaskAlreadyRunning(k) if k == *slot.key()));
        assert_eq!(table.running(), vec![key(SyncTaskKind::UserChats, "u1")]);

        slot.complete();
        assert_eq!(
            table.state(&key(SyncTaskKind::UserChats, "u1")),
            TaskState::Completed
        );
        assert!(table.try_acquire(key(SyncTaskKind::UserChats, "u1")).is_ok());
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let table = LockTable::new();
        let _a = table.try_acquire(key(SyncTaskKind::UserChats, "u1")).unwrap();
        let _b = table.try_acquire(key(SyncTaskKind::UserChats, "u2")).unwrap();
        let _c = table.try_acquire(key(SyncTaskKind::UserContacts, "u1")).unwrap();
        assert_eq!(table.running().len(), 3);
    }

    #[test]
    fn test_dropped_slot_counts_as_failed() {
        let table = LockTable::new();
        let k = key(SyncTaskKind::NewerMessages, "chat");
        assert_eq!(table.state(&k), TaskState::Idle);

        drop(table.try_acquire(k.clone()).unwrap());
        assert_eq!(table.state(&k), TaskState::Failed);
        assert!(table.running().is_empty());
    }
}
