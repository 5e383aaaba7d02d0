use chrono::{DateTime, Utc};
use rusqlite::params;

use potato_shared::{ConversationId, MessageId, UserId};

use crate::database::{decode_id, decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, author_id, body, created_at, updated_at, edited";

impl Database {
    /// Store a new message authored by `author`, assigning its id and timestamps.
    pub fn insert_message(
        &self,
        conversation_id: ConversationId,
        author: UserId,
        body: &str,
    ) -> Result<Message> {
        self.ensure_participant(conversation_id, author)?;

        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            conversation_id,
            author_id: author,
            body: body.to_string(),
            created_at: now,
            updated_at: now,
            edited: false,
        };

        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, author_id, body, created_at, updated_at, edited)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.author_id.to_string(),
                message.body,
                encode_ts(&message.created_at),
                encode_ts(&message.updated_at),
            ],
        )?;
        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// One page of history, newest first.
    ///
    /// With `before` set only messages strictly older than it are returned,
    /// so the boundary message of the previous page is never fetched twice.
    pub fn get_messages_page(
        &self,
        conversation_id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1
               AND (?2 IS NULL OR created_at < ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![
                conversation_id.to_string(),
                before.as_ref().map(encode_ts),
                limit
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Replace the body of `id`.  Only the author may edit.
    pub fn update_message_body(&self, id: MessageId, editor: UserId, body: &str) -> Result<Message> {
        let mut message = self.get_message(id)?;
        if message.author_id != editor {
            return Err(StoreError::NotOwner);
        }

        message.body = body.to_string();
        message.updated_at = Utc::now();
        message.edited = true;

        self.conn().execute(
            "UPDATE messages SET body = ?1, updated_at = ?2, edited = 1 WHERE id = ?3",
            params![message.body, encode_ts(&message.updated_at), id.to_string()],
        )?;
        Ok(message)
    }

    /// Delete `id` on behalf of `requester`.  Only the author may delete.
    /// Returns the removed row so callers can publish the change.
    pub fn delete_message(&self, id: MessageId, requester: UserId) -> Result<Message> {
        let message = self.get_message(id)?;
        if message.author_id != requester {
            return Err(StoreError::NotOwner);
        }

        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(message)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let author_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;
    let edited: bool = row.get(6)?;

    Ok(Message {
        id: decode_id(0, &id_str)?,
        conversation_id: decode_id(1, &conversation_str)?,
        author_id: decode_id(2, &author_str)?,
        body,
        created_at: decode_ts(4, &created_str)?,
        updated_at: decode_ts(5, &updated_str)?,
        edited,
    })
}
