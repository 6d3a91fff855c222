use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::ENTITY_SEPARATOR;
use crate::error::ModelError;

/// Identifier of anything owned by a realm (user, chat, message).
///
/// Opaque outside its realm: two entities are equal only if both the realm
/// and the realm-local id match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    realm_id: String,
    account_entity_id: String,
}

impl Entity {
    pub fn new(realm_id: impl Into<String>, account_entity_id: impl Into<String>) -> Self {
        Self {
            realm_id: realm_id.into(),
            account_entity_id: account_entity_id.into(),
        }
    }

    pub fn realm_id(&self) -> &str {
        &self.realm_id
    }

    /// The id the realm itself uses for this entity.
    pub fn account_entity_id(&self) -> &str {
        &self.account_entity_id
    }

    /// Canonical `<realm>:<id>` form, used as the primary key in storage.
    pub fn entity_id(&self) -> String {
        format!("{}{}{}", self.realm_id, ENTITY_SEPARATOR, self.account_entity_id)
    }

    /// Parse the canonical form produced by [`Entity::entity_id`].
    ///
    /// Only the first separator splits: realm-local ids may contain `:`.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s.split_once(ENTITY_SEPARATOR) {
            Some((realm, id)) if !realm.is_empty() && !id.is_empty() => Ok(Self::new(realm, id)),
            _ => Err(ModelError::InvalidEntity(s.to_string())),
        }
    }

    pub fn in_realm(&self, realm_id: &str) -> bool {
        self.realm_id == realm_id
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.realm_id, ENTITY_SEPARATOR, self.account_entity_id)
    }
}
