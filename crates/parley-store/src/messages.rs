//! Persistence of [`Message`] records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use parley_shared::{count_unread, merge, Entity, MergePolicy, MergeResult, Message, MessageState};

use crate::codec::{decode_entity, decode_properties, decode_time, encode_properties, encode_time};
use crate::database::Database;
use crate::error::Result;

/// Span of the messages stored for one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageWindow {
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
    pub count: usize,
}

const MESSAGE_COLUMNS: &str =
    "id, chat_id, author_id, recipient_id, send_date, title, body, state, read, properties";

impl Database {
    // ------------------------------------------------------------------
    // Load / save
    // ------------------------------------------------------------------

    /// Insert the message, or update its mutable fields. Authorship columns
    /// of an existing row are never rewritten and `read` never goes back
    /// to false.
    pub fn save_message(&self, message: &Message) -> Result<Message> {
        upsert_message(self.conn(), message)?;
        Ok(message.clone())
    }

    pub fn load_message(&self, id: &Entity) -> Result<Option<Message>> {
        query_message(self.conn(), id)
    }

    /// All messages of a chat, oldest first.
    pub fn load_chat_messages(&self, chat: &Entity) -> Result<Vec<Message>> {
        query_chat_messages(self.conn(), chat)
    }

    pub fn last_message(&self, chat: &Entity) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE chat_id = ?1
                     ORDER BY send_date DESC
                     LIMIT 1"
                ),
                params![chat.entity_id()],
                row_to_message,
            )
            .optional()?)
    }

    /// Oldest / newest send date and message count of a chat, `None` when
    /// nothing is stored for it.
    pub fn message_window(&self, chat: &Entity) -> Result<Option<MessageWindow>> {
        let (oldest, newest, count): (Option<String>, Option<String>, i64) = self.conn().query_row(
            "SELECT MIN(send_date), MAX(send_date), COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat.entity_id()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        match (oldest, newest) {
            (Some(oldest), Some(newest)) => Ok(Some(MessageWindow {
                oldest: decode_time(0, &oldest)?,
                newest: decode_time(1, &newest)?,
                count: count as usize,
            })),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    /// Fold one fetched page of messages into a chat.
    ///
    /// A page never proves that a stored message is gone, so nothing is
    /// removed. Every partition is written in one transaction. Messages that
    /// belong to, or are already stored under, another chat are skipped.
    pub fn merge_chat_messages(
        &mut self,
        chat: &Entity,
        messages: Vec<Message>,
    ) -> Result<MergeResult<Message, Entity>> {
        let tx = self.conn_mut().transaction()?;
        let result = merge_messages_in(&tx, chat, messages)?;
        tx.commit()?;
        Ok(result)
    }

    /// Move a message to a new state. Returns the stored message, or `None`
    /// if no such message exists.
    pub fn update_message_state(&self, id: &Entity, state: MessageState) -> Result<Option<Message>> {
        let Some(message) = self.load_message(id)? else {
            return Ok(None);
        };
        let updated = message.with_state(state);
        if !Message::ptr_eq(&updated, &message) {
            upsert_message(self.conn(), &updated)?;
        }
        Ok(Some(updated))
    }

    // ------------------------------------------------------------------
    // Unread
    // ------------------------------------------------------------------

    /// Incoming, unread messages of one chat.
    pub fn unread_count(&self, chat: &Entity) -> Result<usize> {
        Ok(count_unread(&query_chat_messages(self.conn(), chat)?))
    }

    /// Unread counts of every chat that has at least one unread message.
    pub fn unread_counts(&self) -> Result<HashMap<Entity, usize>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT chat_id, state FROM messages WHERE read = 0")?;
        let rows = stmt.query_map([], |row| {
            let chat_str: String = row.get(0)?;
            let state_str: String = row.get(1)?;
            Ok((chat_str, state_str))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (chat_str, state_str) = row?;
            let state: MessageState = state_str.parse()?;
            if state.is_incoming() {
                *counts.entry(Entity::parse(&chat_str)?).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn upsert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, chat_id, author_id, recipient_id, send_date,
                               title, body, state, read, properties)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             title      = excluded.title,
             body       = excluded.body,
             state      = excluded.state,
             read       = MAX(messages.read, excluded.read),
             properties = excluded.properties",
        params![
            message.id().entity_id(),
            message.chat().entity_id(),
            message.author().entity_id(),
            message.recipient().map(Entity::entity_id),
            encode_time(&message.send_date()),
            message.title(),
            message.body(),
            message.state().as_str(),
            message.is_read(),
            encode_properties(message.properties())?,
        ],
    )?;
    Ok(())
}

/// Merge `messages` into `chat` on an open transaction.
pub(crate) fn merge_messages_in(
    conn: &Connection,
    chat: &Entity,
    messages: Vec<Message>,
) -> Result<MergeResult<Message, Entity>> {
    let mut page = Vec::with_capacity(messages.len());
    for message in messages {
        if message.chat() != chat {
            warn!(
                message = %message.id(),
                chat = %chat,
                actual = %message.chat(),
                "skipping message that belongs to another chat"
            );
            continue;
        }
        if let Some(stored) = query_message(conn, message.id())? {
            if stored.chat() != chat {
                warn!(
                    message = %message.id(),
                    chat = %chat,
                    stored_chat = %stored.chat(),
                    "skipping message already stored under another chat"
                );
                continue;
            }
        }
        page.push(message);
    }

    let local = query_chat_messages(conn, chat)?;
    let result = merge(page, local, |m: &Message| m.id().clone(), MergePolicy::PAGE);

    for message in result.added.iter().chain(&result.updated) {
        upsert_message(conn, message)?;
    }

    debug!(
        chat = %chat,
        added = result.added.len(),
        updated = result.updated.len(),
        "merged chat messages"
    );
    Ok(result)
}

fn query_message(conn: &Connection, id: &Entity) -> Result<Option<Message>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id.entity_id()],
            row_to_message,
        )
        .optional()?)
}

fn query_chat_messages(conn: &Connection, chat: &Entity) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE chat_id = ?1
         ORDER BY send_date ASC, id ASC"
    ))?;

    let rows = stmt.query_map(params![chat.entity_id()], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let author_str: String = row.get(2)?;
    let recipient_str: Option<String> = row.get(3)?;
    let send_date_str: String = row.get(4)?;
    let title: String = row.get(5)?;
    let body: String = row.get(6)?;
    let state_str: String = row.get(7)?;
    let read: bool = row.get(8)?;
    let properties_str: String = row.get(9)?;

    let state: MessageState = state_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let mut builder = Message::builder(
        decode_entity(0, &id_str)?,
        decode_entity(2, &author_str)?,
        decode_entity(1, &chat_str)?,
        decode_time(4, &send_date_str)?,
    )
    .title(title)
    .body(body)
    .state(state)
    .read(read)
    .properties(decode_properties(9, &properties_str)?);

    if let Some(recipient) = recipient_str {
        builder = builder.recipient(decode_entity(3, &recipient)?);
    }

    Ok(builder.build())
}
