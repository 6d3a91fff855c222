use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Property;
use crate::merge::Mergeable;
use crate::types::Entity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct UserData {
    id: Entity,
    display_name: String,
    online: bool,
    properties: Vec<Property>,
}

/// A user known to one realm (the account owner or one of its contacts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct User {
    inner: Arc<UserData>,
}

impl User {
    pub fn new(id: Entity, display_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(UserData {
                id,
                display_name: display_name.into(),
                online: false,
                properties: Vec::new(),
            }),
        }
    }

    pub fn ptr_eq(a: &User, b: &User) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn id(&self) -> &Entity {
        &self.inner.id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn is_online(&self) -> bool {
        self.inner.online
    }

    pub fn properties(&self) -> &[Property] {
        &self.inner.properties
    }

    pub fn with_online(&self, online: bool) -> User {
        if self.inner.online == online {
            return self.clone();
        }
        self.modify(|u| u.online = online)
    }

    pub fn with_properties(&self, properties: Vec<Property>) -> User {
        if self.inner.properties == properties {
            return self.clone();
        }
        self.modify(|u| u.properties = properties)
    }

    /// Remote owns every mutable field of a user.
    pub fn merge_from(&self, remote: &User) -> User {
        if User::ptr_eq(self, remote) {
            return self.clone();
        }
        let theirs = &remote.inner;
        if self.inner.display_name == theirs.display_name
            && self.inner.online == theirs.online
            && self.inner.properties == theirs.properties
        {
            return self.clone();
        }
        self.modify(|u| {
            u.display_name = theirs.display_name.clone();
            u.online = theirs.online;
            u.properties = theirs.properties.clone();
        })
    }

    fn modify(&self, f: impl FnOnce(&mut UserData)) -> User {
        let mut data = (*self.inner).clone();
        f(&mut data);
        User {
            inner: Arc::new(data),
        }
    }
}

impl Mergeable for User {
    fn merge_from(&self, remote: &Self) -> Self {
        User::merge_from(self, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_online_short_circuits() {
        let user = User::new(Entity::new("xmpp", "bob"), "Bob");
        assert!(User::ptr_eq(&user.with_online(false), &user));
        assert!(user.with_online(true).is_online());
    }

    #[test]
    fn test_merge_from_takes_remote_name() {
        let local = User::new(Entity::new("xmpp", "bob"), "Bob");
        let remote = User::new(Entity::new("xmpp", "bob"), "Robert");
        let merged = local.merge_from(&remote);
        assert_eq!(merged.display_name(), "Robert");
        assert_eq!(local.display_name(), "Bob");
    }
}
