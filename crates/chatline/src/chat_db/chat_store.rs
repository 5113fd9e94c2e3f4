use crate::chat_db::schema::*;
use crate::error::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Chat session rows: create, list, rename, title, delete
pub struct ChatStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ChatStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Creates an empty chat shell with a fresh UUID and no title
    pub fn create_chat(&self) -> Result<Chat> {
        let chat_id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO chats (id, title, created_at, updated_at) VALUES (?1, NULL, ?2, ?2)",
            params![&chat_id, &now_str],
        )?;

        info!("Created chat {}", chat_id);
        Ok(Chat { id: chat_id, title: None, created_at: now, updated_at: now })
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let conn = self.get_conn()?;
        let chat = conn
            .query_row(
                "SELECT id, title, created_at, updated_at FROM chats WHERE id = ?1",
                [chat_id],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    /// All chats, most recently updated first
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM chats ORDER BY updated_at DESC, id",
        )?;
        let chats = stmt
            .query_map([], row_to_chat)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Listed {} chats", chats.len());
        Ok(chats)
    }

    /// Sets or clears the title. Returns false when the chat does not exist.
    pub fn rename_chat(&self, chat_id: &str, title: Option<&str>) -> Result<bool> {
        let conn = self.get_conn()?;
        let (_, now_str) = now_timestamp();
        let updated = conn.execute(
            "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, now_str, chat_id],
        )?;
        if updated > 0 {
            info!("Renamed chat {} to {:?}", chat_id, title);
        }
        Ok(updated > 0)
    }

    /// Sets the title only while it is still NULL. Returns whether it was set.
    pub fn set_title_if_missing(&self, chat_id: &str, title: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE chats SET title = ?1 WHERE id = ?2 AND title IS NULL",
            params![title, chat_id],
        )?;
        if updated > 0 {
            info!("Auto-titled chat {}: {}", chat_id, title);
        }
        Ok(updated > 0)
    }

    /// Deletes the chat; messages and parts go with it via cascade
    pub fn delete_chat(&self, chat_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
        info!("Deleted chat {} ({} row)", chat_id, deleted);
        Ok(deleted)
    }

    pub fn message_count(&self, chat_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_chat(row: &Row) -> rusqlite::Result<Chat> {
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;
    Ok(Chat {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_column_timestamp(&created_at, "created_at"),
        updated_at: parse_column_timestamp(&updated_at, "updated_at"),
    })
}
