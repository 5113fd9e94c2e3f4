//! Transcript persistence: messages decomposed into ordered part rows.
//!
//! `save_chat` writes a whole transcript in one IMMEDIATE transaction;
//! `load_chat` rebuilds it with a single join. The `*_with_conn` functions
//! take the connection explicitly so callers can compose them inside their
//! own transactions.

use crate::chat_db::part_columns::{PartColumns, PART_SELECT_COLUMNS};
use crate::chat_db::schema::now_timestamp;
use crate::error::{ChatError, Result};
use crate::transcript::{ChatMessage, Role};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from one `save_chat` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub messages: usize,
    pub inserted_messages: usize,
    pub parts: usize,
}

pub struct TranscriptStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl TranscriptStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    /// Persists every message and its parts and bumps the chat's `updated_at`.
    /// Any failure rolls the whole call back.
    pub fn save_chat(&self, chat_id: &str, messages: &[ChatMessage]) -> Result<SaveSummary> {
        debug!("save_chat: chat {} with {} messages", chat_id, messages.len());

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match save_chat_with_conn(&tx, chat_id, messages) {
            Ok(summary) => {
                tx.commit()?;
                info!(
                    "Saved chat {}: {} messages ({} new), {} parts",
                    chat_id, summary.messages, summary.inserted_messages, summary.parts
                );
                Ok(summary)
            }
            Err(e) => {
                // dropping `tx` rolls back
                warn!("save_chat rolled back for chat {}: {}", chat_id, e);
                Err(e)
            }
        }
    }

    /// Messages oldest first, parts in stored order. Empty for a chat
    /// without messages.
    pub fn load_chat(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.pool.get()?;
        load_chat_with_conn(&conn, chat_id)
    }
}

pub fn save_chat_with_conn(
    conn: &Connection,
    chat_id: &str,
    messages: &[ChatMessage],
) -> Result<SaveSummary> {
    let chat_exists = conn
        .query_row("SELECT 1 FROM chats WHERE id = ?1", [chat_id], |_| Ok(()))
        .optional()?
        .is_some();
    if !chat_exists {
        return Err(ChatError::ChatNotFound(chat_id.to_string()));
    }

    let (_, now_str) = now_timestamp();
    let mut summary = SaveSummary::default();

    for message in messages {
        // A resumed stream may already have written this id; keep the row
        let inserted = conn.execute(
            "INSERT INTO messages (id, chat_id, role, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO NOTHING",
            params![message.id, chat_id, message.role.as_str(), now_str],
        )?;

        let owner: String = conn.query_row(
            "SELECT chat_id FROM messages WHERE id = ?1",
            [&message.id],
            |row| row.get(0),
        )?;
        if owner != chat_id {
            return Err(ChatError::validation(format!(
                "message {} belongs to a different chat",
                message.id
            )));
        }

        conn.execute("DELETE FROM parts WHERE message_id = ?1", [&message.id])?;
        for (order, part) in message.parts.iter().enumerate() {
            PartColumns::from_part(part)?.insert(conn, &message.id, order as i64, &now_str)?;
        }

        summary.messages += 1;
        summary.inserted_messages += inserted;
        summary.parts += message.parts.len();
    }

    conn.execute(
        "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
        params![now_str, chat_id],
    )?;

    Ok(summary)
}

pub fn load_chat_with_conn(conn: &Connection, chat_id: &str) -> Result<Vec<ChatMessage>> {
    let sql = format!(
        "SELECT m.id, m.role, {}
         FROM messages m
         LEFT JOIN parts p ON p.message_id = m.id
         WHERE m.chat_id = ?1
         ORDER BY m.created_at ASC, m.rowid ASC, p.part_order ASC",
        PART_SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([chat_id])?;

    let mut messages: Vec<ChatMessage> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    while let Some(row) = rows.next()? {
        let message_id: String = row.get(0)?;

        let idx = match index_by_id.get(&message_id) {
            Some(idx) => *idx,
            None => {
                let role_str: String = row.get(1)?;
                let role: Role = role_str.parse().map_err(|_| ChatError::CorruptPart {
                    message_id: message_id.clone(),
                    reason: format!("unknown role '{}'", role_str),
                })?;
                messages.push(ChatMessage::new(message_id.clone(), role, Vec::new()));
                index_by_id.insert(message_id.clone(), messages.len() - 1);
                messages.len() - 1
            }
        };

        let Some(columns) = PartColumns::from_row(row, 2)? else {
            continue;
        };
        let part_type = columns.part_type.clone();
        match columns.into_part(&message_id)? {
            Some(part) => messages[idx].parts.push(part),
            None => warn!("Skipping part of unknown type '{}' in message {}", part_type, message_id),
        }
    }

    debug!("Loaded {} messages for chat {}", messages.len(), chat_id);
    Ok(messages)
}
