//! SQLite storage backend using rusqlite.
//!
//! Gives native hosts (the CLI, desktop shells) a durable string key-value
//! area with the same semantics as `localStorage`. Uses WAL mode by default.
//!
//! # Example
//!
//! ```no_run
//! use tasklist_store::{KeyValueBackend, SqliteBackend};
//!
//! let mut backend = SqliteBackend::open("tasks.db").unwrap();
//! backend.set("app-namespace-tasks", "[]").unwrap();
//! assert_eq!(backend.get("app-namespace-tasks").unwrap().as_deref(), Some("[]"));
//! ```

use std::path::Path;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use crate::backend::{BackendError, KeyValueBackend};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// Maximum stored size in characters (keys plus values). Writes beyond
    /// it fail with [`BackendError::QuotaExceeded`], the way a browser
    /// storage area does. `None` means unlimited.
    pub capacity_chars: Option<u64>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            capacity_chars: None,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead logging; readers do not block the writer.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => Self::QuotaExceeded,
            Some(
                ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied
                | ErrorCode::AuthorizationForStatementDenied,
            ) => Self::AccessDenied(e.to_string()),
            _ => Self::Unavailable(e.to_string()),
        }
    }
}

/// SQLite storage backend.
///
/// One table of `(key, value)` text pairs. Creates the schema on first open.
/// There is no cross-context change channel: [`watch`](KeyValueBackend::watch)
/// is unsupported.
pub struct SqliteBackend {
    conn: Connection,
    capacity_chars: Option<u64>,
}

impl SqliteBackend {
    /// Open (or create) a database at `path` with the default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, BackendError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        debug!(path = %path.as_ref().display(), "opened sqlite storage");
        Ok(Self {
            conn,
            capacity_chars: config.capacity_chars,
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::open_in_memory_with_config(SqliteConfig::default())
    }

    pub fn open_in_memory_with_config(config: SqliteConfig) -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn,
            capacity_chars: config.capacity_chars,
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), BackendError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), BackendError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(())
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Characters stored under keys other than `key`.
    fn used_chars_excluding(&self, key: &str) -> Result<u64, BackendError> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(length(key) + length(value)), 0) FROM kv_store WHERE key <> ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as u64)
    }

    /// Database file size in bytes (0 for in-memory).
    pub fn file_size(&self) -> Result<u64, BackendError> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    pub fn journal_mode(&self) -> Result<String, BackendError> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

impl KeyValueBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        if let Some(capacity) = self.capacity_chars {
            let incoming = (key.chars().count() + value.chars().count()) as u64;
            if self.used_chars_excluding(key)? + incoming > capacity {
                return Err(BackendError::QuotaExceeded);
            }
        }
        self.conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Self::now_ms() as i64],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn clear(&mut self, prefix: &str) -> Result<usize, BackendError> {
        let removed = self.conn.execute(
            "DELETE FROM kv_store WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(removed)
    }

    fn entries(&self, prefix: &str) -> Result<Vec<(String, String)>, BackendError> {
        let mut stmt = self.conn.prepare(
            "SELECT key, value FROM kv_store
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let entries = stmt
            .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, String)>, _>>()?;
        Ok(entries)
    }
}
