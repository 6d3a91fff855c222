/// Separator between the realm id and the realm-local id in an entity string
pub const ENTITY_SEPARATOR: char = ':';

/// Key derivation context for private chat ids (BLAKE3)
pub const KDF_CONTEXT_PRIVATE_CHAT: &str = "parley-private-chat-v1";

/// Byte placed between the two participant ids before hashing
pub const PRIVATE_CHAT_ID_SEPARATOR: u8 = 0x00;

/// Number of participants in a private chat
pub const PRIVATE_CHAT_PARTICIPANTS: usize = 2;

/// Message property carrying the id a backend assigned to a sent message
pub const PROPERTY_REMOTE_ID: &str = "remote_id";
