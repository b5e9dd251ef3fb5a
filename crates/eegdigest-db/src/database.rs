//! Connection handling and table setup.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{DbError, Result};

pub const TABLE_TRIAGE: &str = "triage";
pub const TABLE_SUMMARIES: &str = "summaries";

/// Main database handle. Writes are serialised through the connection mutex.
pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    /// Open or create the database file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn), path: path.to_string_lossy().to_string() };
        db.initialize()?;
        debug!(path = %db.path, "Database opened");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.initialize()?;
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS papers (
                arxiv_id_base TEXT PRIMARY KEY,
                arxiv_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                title TEXT NOT NULL,
                published TEXT NOT NULL,
                month TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_papers_month ON papers(month);

            CREATE TABLE IF NOT EXISTS triage (
                arxiv_id_base TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS summaries (
                arxiv_id_base TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}
