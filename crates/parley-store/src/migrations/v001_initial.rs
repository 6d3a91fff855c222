//! v001 -- Initial schema creation.
//!
//! Entity ids are stored in their canonical `<realm>:<id>` form; every table
//! that can be wiped per realm also carries a plain `realm_id` column.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (account owners and their contacts)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- <realm>:<id>
    realm_id     TEXT NOT NULL,
    display_name TEXT NOT NULL,
    online       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    properties   TEXT NOT NULL DEFAULT '[]'   -- JSON array of {name, value}
);

CREATE INDEX IF NOT EXISTS idx_users_realm ON users(realm_id);

CREATE TABLE IF NOT EXISTS user_contacts (
    realm_id   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    contact_id TEXT NOT NULL,

    PRIMARY KEY (user_id, contact_id)
);

CREATE INDEX IF NOT EXISTS idx_user_contacts_realm ON user_contacts(realm_id);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id             TEXT PRIMARY KEY NOT NULL, -- <realm>:<id>, derived for private chats
    realm_id       TEXT NOT NULL,
    remote_id      TEXT,                      -- backend id of a private chat
    last_sync_date TEXT,                      -- RFC-3339, microsecond precision
    properties     TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_chats_realm ON chats(realm_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_remote
    ON chats(realm_id, remote_id) WHERE remote_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id TEXT NOT NULL,
    user_id TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS user_chats (
    user_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,

    PRIMARY KEY (user_id, chat_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,   -- <realm>:<id>
    chat_id      TEXT NOT NULL,               -- FK -> chats(id)
    author_id    TEXT NOT NULL,
    recipient_id TEXT,
    send_date    TEXT NOT NULL,               -- RFC-3339, microsecond precision
    title        TEXT NOT NULL DEFAULT '',
    body         TEXT NOT NULL DEFAULT '',
    state        TEXT NOT NULL,
    read         INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    properties   TEXT NOT NULL DEFAULT '[]',

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_date
    ON messages(chat_id, send_date);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
