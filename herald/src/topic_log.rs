//! Durable topic log.
//!
//! Write-through persistence for the topic store: one row per canonical topic
//! holding only its latest message. Loaded in full at startup.

use hrd_core::{HeraldError, Result};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub const DATABASE_FILE: &str = "herald.db";

pub trait TopicLog: Send + Sync {
    fn load_all(&self) -> Result<Vec<(String, String)>>;

    /// Write one topic value. Returns once the write is durable.
    fn persist(&self, topic: &str, message: &str) -> Result<()>;
}

fn storage_error(context: &str, e: rusqlite::Error) -> HeraldError {
    HeraldError::Storage(format!("{}: {}", context, e))
}

/// SQLite-backed topic log.
pub struct SqliteTopicLog {
    // rusqlite connections are Send but not Sync
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteTopicLog {
    /// Open (or create) `<data_dir>/herald.db`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DATABASE_FILE);

        let conn = Connection::open(&path).map_err(|e| storage_error("open database", e))?;

        // WAL keeps readers off the writer's back; FULL syncs before commit returns.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| storage_error("set journal_mode", e))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| storage_error("set synchronous", e))?;

        Self::init(conn, Some(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage_error("open database", e))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS topics (
                topic TEXT PRIMARY KEY,
                latest_message TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| storage_error("create topics table", e))?;

        if let Some(path) = &path {
            info!(target: "herald::topic_log", path = %path.display(), "Topic log opened");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl TopicLog for SqliteTopicLog {
    fn load_all(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stmt = conn
            .prepare("SELECT topic, latest_message FROM topics")
            .map_err(|e| storage_error("prepare load", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| storage_error("load topics", e))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| storage_error("read topic row", e))?);
        }
        Ok(entries)
    }

    fn persist(&self, topic: &str, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO topics (topic, latest_message) VALUES (?1, ?2)
             ON CONFLICT(topic) DO UPDATE SET latest_message = excluded.latest_message",
            params![topic, message],
        )
        .map_err(|e| storage_error("persist topic", e))?;
        Ok(())
    }
}
