//! Chat database module - SQLite-backed storage for chats, messages and parts
pub mod schema;
pub mod migration;
pub mod part_columns;
pub mod chat_store;
pub mod transcript_store;
pub use schema::*;
pub use migration::{latest_version, MigrationManager};
pub use chat_store::ChatStore;
pub use transcript_store::{load_chat_with_conn, save_chat_with_conn, SaveSummary, TranscriptStore};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

// synchronous is per connection; journal_mode = WAL persists in the file
const FILE_CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;
     PRAGMA synchronous = NORMAL;";

/// Owns the connection pool and the stores built on it
pub struct ChatDatabase {
    pub chats: ChatStore,
    pub transcripts: TranscriptStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
    file_backed: bool,
}

impl ChatDatabase {
    /// Opens (creating if needed) a file database and migrates it
    pub fn new(db_path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        info!("Opening chat database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| conn.execute_batch(FILE_CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }

        info!("Chat database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool), true))
    }

    /// Private in-memory database. The pool holds a single connection that
    /// never expires so every store sees the same data.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool), false))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>, file_backed: bool) -> Self {
        Self {
            chats: ChatStore::new(Arc::clone(&pool)),
            transcripts: TranscriptStore::new(Arc::clone(&pool)),
            pool,
            file_backed,
        }
    }

    /// Borrow a pooled connection for ad-hoc queries
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn schema_version(&self) -> anyhow::Result<i32> {
        let mut conn = self.pool.get()?;
        Ok(MigrationManager::new(&mut conn).get_current_version()?)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let conn = self.pool.get()?;
        let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };

        let page_count = count("PRAGMA page_count")?;
        let page_size = count("PRAGMA page_size")?;

        Ok(DatabaseStats {
            total_chats: count("SELECT COUNT(*) FROM chats")?,
            total_messages: count("SELECT COUNT(*) FROM messages")?,
            total_parts: count("SELECT COUNT(*) FROM parts")?,
            untitled_chats: count("SELECT COUNT(*) FROM chats WHERE title IS NULL")?,
            database_size_bytes: page_count * page_size,
        })
    }
}

impl Drop for ChatDatabase {
    fn drop(&mut self) {
        if !self.file_backed {
            return;
        }
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}
