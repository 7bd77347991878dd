pub mod chat;
pub mod donations;
pub mod invitations;
pub mod migrations;
pub mod models;
pub mod photos;
pub mod queries;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Timestamp layout shared with SQLite's `datetime('now')`, so stored values
/// compare lexicographically in SQL.
pub const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Exclusive access for multi-statement writes; callers open a transaction
    /// on the handed-out connection when the writes must land together.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

pub fn to_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the native SQLite layout and RFC 3339.
pub fn parse_db_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = raw.parse::<DateTime<Utc>>() {
        return Ok(t);
    }
    NaiveDateTime::parse_from_str(raw, DB_TIME_FORMAT)
        .map(|ndt| ndt.and_utc())
        .map_err(|e| anyhow!("bad timestamp '{}': {}", raw, e))
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
