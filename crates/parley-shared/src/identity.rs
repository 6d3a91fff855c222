use crate::constants::{KDF_CONTEXT_PRIVATE_CHAT, PRIVATE_CHAT_ID_SEPARATOR};
use crate::types::Entity;

/// Derive the local id of the private chat between two users.
///
/// The result depends only on the two participant ids: argument order,
/// wall-clock time and any id the backend assigned to the chat play no part.
/// The derived chat lives in the realm of the lesser participant.
pub fn derive_private_chat_id(user1: &Entity, user2: &Entity) -> Entity {
    let id1 = user1.entity_id();
    let id2 = user2.entity_id();
    let (first, second, realm) = if id1 <= id2 {
        (id1, id2, user1.realm_id())
    } else {
        (id2, id1, user2.realm_id())
    };

    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_PRIVATE_CHAT);
    hasher.update(first.as_bytes());
    hasher.update(&[PRIVATE_CHAT_ID_SEPARATOR]);
    hasher.update(second.as_bytes());
    let hash = hasher.finalize();

    Entity::new(realm, hex::encode(hash.as_bytes()))
}
