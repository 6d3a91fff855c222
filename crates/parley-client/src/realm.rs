//! Connected accounts and the registry that resolves them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use parley_shared::Entity;

use crate::backend::Backend;
use crate::error::{SyncError, SyncResult};

/// One account on one messaging network.
pub struct Realm {
    id: String,
    user: Entity,
    backend: Arc<dyn Backend>,
    notify_sent_immediately: Option<bool>,
}

impl Realm {
    /// `user` is the account owner and is expected to live in realm `id`.
    pub fn new(id: impl Into<String>, user: Entity, backend: Arc<dyn Backend>) -> Self {
        Self {
            id: id.into(),
            user,
            backend,
            notify_sent_immediately: None,
        }
    }

    /// Override [`ClientConfig::notify_sent_immediately`](crate::config::ClientConfig)
    /// for this realm.
    pub fn with_notify_sent_immediately(mut self, notify: bool) -> Self {
        self.notify_sent_immediately = Some(notify);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user(&self) -> &Entity {
        &self.user
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn notify_sent_immediately(&self) -> Option<bool> {
        self.notify_sent_immediately
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("notify_sent_immediately", &self.notify_sent_immediately)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct RealmRegistry {
    realms: RwLock<HashMap<String, Arc<Realm>>>,
}

impl RealmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a realm. Returns the realm previously registered
    /// under the same id.
    pub fn register(&self, realm: Realm) -> Option<Arc<Realm>> {
        info!(realm = realm.id(), user = %realm.user(), "Registering realm");
        self.realms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(realm.id.clone(), Arc::new(realm))
    }

    pub fn get(&self, id: &str) -> SyncResult<Arc<Realm>> {
        self.realms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownRealm(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Realm>> {
        self.realms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .realms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;

    fn realm(id: &str) -> Realm {
        Realm::new(id, Entity::new(id, "me"), Arc::new(FakeBackend::default()))
    }

    #[test]
    fn test_register_get_remove() {
        let registry = RealmRegistry::new();
        assert!(registry.register(realm("xmpp")).is_none());
        assert!(registry.register(realm("vk")).is_none());
        assert_eq!(registry.ids(), vec!["vk", "xmpp"]);

        assert_eq!(registry.get("xmpp").unwrap().user(), &Entity::new("xmpp", "me"));
        assert!(registry.remove("xmpp").is_some());
        assert!(registry.remove("xmpp").is_none());
        assert!(matches!(registry.get("xmpp"), Err(SyncError::UnknownRealm(id)) if id == "xmpp"));
    }

    #[test]
    fn test_notify_override() {
        assert_eq!(realm("xmpp").notify_sent_immediately(), None);
        assert_eq!(
            realm("xmpp")
                .with_notify_sent_immediately(false)
                .notify_sent_immediately(),
            Some(false)
        );
    }
}
