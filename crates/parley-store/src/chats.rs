//! Persistence of [`Chat`] records, their participants and the per-user
//! chat lists.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use parley_shared::{merge, Chat, Entity, MergePolicy, MergeResult, Message};

use crate::codec::{decode_entity, decode_properties, decode_time, encode_properties, encode_time};
use crate::database::Database;
use crate::error::Result;
use crate::messages::merge_messages_in;

impl Database {
    // ------------------------------------------------------------------
    // Load / save
    // ------------------------------------------------------------------

    /// Insert or update a chat together with its participant list.
    ///
    /// The stored `last_sync_date` only moves forward and a stored
    /// `remote_id` is kept when the new value has none.
    pub fn save_chat(&mut self, chat: &Chat) -> Result<Chat> {
        let tx = self.conn_mut().transaction()?;
        upsert_chat(&tx, chat)?;
        let stored = query_chat(&tx, chat.id())?.unwrap_or_else(|| chat.clone());
        tx.commit()?;
        Ok(if stored == *chat { chat.clone() } else { stored })
    }

    pub fn load_chat(&self, id: &Entity) -> Result<Option<Chat>> {
        query_chat(self.conn(), id)
    }

    /// Look a derived private chat up by the id its backend uses.
    pub fn load_chat_by_remote_id(&self, realm_id: &str, remote_id: &str) -> Result<Option<Chat>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM chats WHERE realm_id = ?1 AND remote_id = ?2",
                params![realm_id, remote_id],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => query_chat(self.conn(), &Entity::parse(&id)?),
            None => Ok(None),
        }
    }

    /// Chats listed for `user`.
    pub fn load_user_chats(&self, user: &Entity) -> Result<Vec<Chat>> {
        query_user_chats(self.conn(), user)
    }

    /// Add `chat` to the chat list of `user`. Returns `false` if it was
    /// already listed.
    pub fn link_user_chat(&self, user: &Entity, chat: &Entity) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO user_chats (user_id, chat_id) VALUES (?1, ?2)",
            params![user.entity_id(), chat.entity_id()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    /// Reconcile the chat list of `user` with the complete list a backend
    /// returned. Chats missing remotely are taken off the user's list; the
    /// chat rows and their messages stay until the realm is removed.
    pub fn merge_user_chats(&mut self, user: &Entity, chats: Vec<Chat>) -> Result<MergeResult<Chat, Entity>> {
        let tx = self.conn_mut().transaction()?;
        let result = merge_user_chats_in(&tx, user, chats)?;
        tx.commit()?;
        Ok(result)
    }

    /// Same as [`Database::merge_user_chats`], then merge the message pages
    /// that came bundled with the chats. Nothing is committed unless every
    /// merge succeeds.
    pub fn merge_user_chats_with_messages(
        &mut self,
        user: &Entity,
        chats: Vec<Chat>,
        bundled: Vec<(Entity, Vec<Message>)>,
    ) -> Result<(MergeResult<Chat, Entity>, Vec<(Entity, MergeResult<Message, Entity>)>)> {
        let tx = self.conn_mut().transaction()?;

        let result = merge_user_chats_in(&tx, user, chats)?;
        let mut merged = Vec::with_capacity(bundled.len());
        for (chat, messages) in bundled {
            let page = merge_messages_in(&tx, &chat, messages)?;
            merged.push((chat, page));
        }

        tx.commit()?;
        Ok((result, merged))
    }

    /// Take every chat without a single stored message off the chat list
    /// of `user`. Returns the ids of the unlinked chats.
    pub fn remove_empty_chats(&mut self, user: &Entity) -> Result<Vec<Entity>> {
        let tx = self.conn_mut().transaction()?;

        let empty: Vec<Entity> = {
            let mut stmt = tx.prepare(
                "SELECT uc.chat_id FROM user_chats uc
                 WHERE uc.user_id = ?1
                   AND NOT EXISTS (SELECT 1 FROM messages m WHERE m.chat_id = uc.chat_id)
                 ORDER BY uc.chat_id ASC",
            )?;
            let rows = stmt.query_map(params![user.entity_id()], |row| {
                let id_str: String = row.get(0)?;
                decode_entity(0, &id_str)
            })?;
            let ids = rows.collect::<rusqlite::Result<Vec<Entity>>>()?;
            ids
        };

        for chat in &empty {
            tx.execute(
                "DELETE FROM user_chats WHERE user_id = ?1 AND chat_id = ?2",
                params![user.entity_id(), chat.entity_id()],
            )?;
        }
        tx.commit()?;

        info!(user = %user, removed = empty.len(), "removed empty chats");
        Ok(empty)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete every chat of a realm. ON DELETE CASCADE takes participants,
    /// chat list entries and messages with it. Returns the number of deleted
    /// chats; 0 if the realm had none left.
    pub fn remove_chats_in_account(&self, realm_id: &str) -> Result<usize> {
        let removed = self
            .conn()
            .execute("DELETE FROM chats WHERE realm_id = ?1", params![realm_id])?;

        info!(realm = realm_id, removed, "removed chats in account");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn merge_user_chats_in(conn: &Connection, user: &Entity, chats: Vec<Chat>) -> Result<MergeResult<Chat, Entity>> {
    let local = query_user_chats(conn, user)?;
    let result = merge(chats, local, |c: &Chat| c.id().clone(), MergePolicy::FULL);

    for chat in &result.added {
        upsert_chat(conn, chat)?;
        conn.execute(
            "INSERT OR IGNORE INTO user_chats (user_id, chat_id) VALUES (?1, ?2)",
            params![user.entity_id(), chat.id().entity_id()],
        )?;
    }
    for chat in &result.updated {
        upsert_chat(conn, chat)?;
    }
    for chat_id in &result.removed {
        conn.execute(
            "DELETE FROM user_chats WHERE user_id = ?1 AND chat_id = ?2",
            params![user.entity_id(), chat_id.entity_id()],
        )?;
    }

    info!(
        user = %user,
        added = result.added.len(),
        updated = result.updated.len(),
        removed = result.removed.len(),
        "merged user chats"
    );
    Ok(result)
}

pub(crate) fn upsert_chat(conn: &Connection, chat: &Chat) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (id, realm_id, remote_id, last_sync_date, properties)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             remote_id      = COALESCE(excluded.remote_id, chats.remote_id),
             last_sync_date = CASE
                 WHEN chats.last_sync_date IS NULL
                   OR excluded.last_sync_date > chats.last_sync_date
                 THEN excluded.last_sync_date
                 ELSE chats.last_sync_date
             END,
             properties     = excluded.properties",
        params![
            chat.id().entity_id(),
            chat.id().realm_id(),
            chat.remote_id(),
            chat.last_sync_date().as_ref().map(encode_time),
            encode_properties(chat.properties())?,
        ],
    )?;

    conn.execute(
        "DELETE FROM chat_participants WHERE chat_id = ?1",
        params![chat.id().entity_id()],
    )?;
    for participant in chat.participants() {
        conn.execute(
            "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
            params![chat.id().entity_id(), participant.entity_id()],
        )?;
    }
    Ok(())
}

pub(crate) fn query_chat(conn: &Connection, id: &Entity) -> Result<Option<Chat>> {
    let row = conn
        .query_row(
            "SELECT remote_id, last_sync_date, properties FROM chats WHERE id = ?1",
            params![id.entity_id()],
            |row| {
                let remote_id: Option<String> = row.get(0)?;
                let last_sync_str: Option<String> = row.get(1)?;
                let properties_str: String = row.get(2)?;

                let last_sync_date = last_sync_str.map(|s| decode_time(1, &s)).transpose()?;
                let properties = decode_properties(2, &properties_str)?;
                Ok((remote_id, last_sync_date, properties))
            },
        )
        .optional()?;

    let Some((remote_id, last_sync_date, properties)) = row else {
        return Ok(None);
    };

    let mut chat = Chat::new(id.clone(), query_participants(conn, id)?).with_properties(properties);
    if let Some(date) = last_sync_date {
        chat = chat.with_last_sync_date(date);
    }
    if let Some(remote_id) = remote_id {
        chat = chat.with_remote_id(remote_id);
    }
    Ok(Some(chat))
}

fn query_participants(conn: &Connection, chat: &Entity) -> Result<BTreeSet<Entity>> {
    let mut stmt = conn.prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1")?;
    let rows = stmt.query_map(params![chat.entity_id()], |row| {
        let id_str: String = row.get(0)?;
        decode_entity(0, &id_str)
    })?;

    let mut participants = BTreeSet::new();
    for row in rows {
        participants.insert(row?);
    }
    Ok(participants)
}

fn query_user_chats(conn: &Connection, user: &Entity) -> Result<Vec<Chat>> {
    let mut stmt = conn.prepare(
        "SELECT chat_id FROM user_chats WHERE user_id = ?1 ORDER BY chat_id ASC",
    )?;
    let rows = stmt.query_map(params![user.entity_id()], |row| {
        let id_str: String = row.get(0)?;
        decode_entity(0, &id_str)
    })?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }

    let mut chats = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(chat) = query_chat(conn, &id)? {
            chats.push(chat);
        }
    }
    Ok(chats)
}
