use crate::Database;
use crate::models::{ConversationRow, MessageRow, NewMessage};
use crate::queries::OptionalExt;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, is_active, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, recipient_id, content, attachments, is_read, created_at";

impl Database {
    // -- Conversations --

    /// Find or create the conversation between two users. Participant order
    /// does not matter; a soft-deleted conversation is reactivated.
    pub fn upsert_conversation(&self, user_a: &str, user_b: &str, now: &str) -> Result<ConversationRow> {
        self.with_conn_mut(|conn| upsert_pair(conn, user_a, user_b, now))
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
            ))?;
            let row = stmt.query_row([id], map_conversation).optional()?;
            Ok(row)
        })
    }

    /// Active conversations of a user, most recently updated first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE (participant_a = ?1 OR participant_b = ?1) AND is_active = 1
                 ORDER BY updated_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn deactivate_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("UPDATE conversations SET is_active = 0 WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Store a message and move the conversation's last-message pointer in
    /// one transaction.
    pub fn send_message(&self, message: &NewMessage<'_>, now: &str) -> Result<(ConversationRow, MessageRow)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let conversation = upsert_pair(&tx, message.sender_id, message.recipient_id, now)?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, attachments, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    message.id,
                    conversation.id,
                    message.sender_id,
                    message.recipient_id,
                    message.content,
                    message.attachments,
                    now,
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_id = ?2, updated_at = ?3, is_active = 1 WHERE id = ?1",
                (&conversation.id, message.id, now),
            )?;

            let conversation = query_conversation(&tx, &conversation.id)?
                .ok_or_else(|| anyhow!("conversation vanished"))?;
            let stored = query_message(&tx, message.id)?.ok_or_else(|| anyhow!("message vanished after insert"))?;
            tx.commit()?;
            Ok((conversation, stored))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Messages of a conversation in send order.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark every unread message from `sender_id` to `recipient_id` as read.
    /// Returns how many flipped; repeating the call flips none.
    pub fn mark_read(&self, recipient_id: &str, sender_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND is_read = 0",
                (recipient_id, sender_id),
            )?;
            Ok(changed)
        })
    }

    pub fn unread_count(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn upsert_pair(conn: &Connection, user_a: &str, user_b: &str, now: &str) -> Result<ConversationRow> {
    let (low, high) = if user_a < user_b { (user_a, user_b) } else { (user_b, user_a) };

    conn.execute(
        "INSERT INTO conversations (id, participant_a, participant_b, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?4)
         ON CONFLICT(participant_a, participant_b) DO UPDATE SET is_active = 1",
        (Uuid::new_v4().to_string(), low, high, now),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_a = ?1 AND participant_b = ?2"
    ))?;
    let row = stmt.query_row((low, high), map_conversation)?;
    Ok(row)
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"))?;
    let row = stmt.query_row([id], map_conversation).optional()?;
    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?;
    let row = stmt.query_row([id], map_message).optional()?;
    Ok(row)
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        last_message_id: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        attachments: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}
