//! Database connection and query operations.

use crate::{migrations, DatabaseResult, QueueRow};
use chrono::{DateTime, Utc};
use courier_storage::{KeyValueStore, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Database wrapper with query methods.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // FULL sync: an append must survive power loss once it returns.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;
        debug!(path = %path.display(), "Database opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==========================================
    // Request queue
    // ==========================================

    /// Append a payload, returning its newly assigned sequence.
    pub fn insert_queue_entry(&self, payload: &[u8]) -> DatabaseResult<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO request_queue (payload, inserted_at) VALUES (?1, ?2)",
            params![payload, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All queued rows in ascending sequence order.
    pub fn list_queue_entries(&self) -> DatabaseResult<Vec<QueueRow>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT sequence, payload, inserted_at FROM request_queue ORDER BY sequence ASC",
        )?;

        let rows = stmt
            .query_map([], map_queue_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// The lowest-sequence row, if any.
    pub fn first_queue_entry(&self) -> DatabaseResult<Option<QueueRow>> {
        let conn = self.connection();
        let row = conn
            .query_row(
                "SELECT sequence, payload, inserted_at FROM request_queue
                 ORDER BY sequence ASC LIMIT 1",
                [],
                map_queue_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Delete a row by sequence.
    pub fn delete_queue_entry(&self, sequence: i64) -> DatabaseResult<bool> {
        let count = self.connection().execute(
            "DELETE FROM request_queue WHERE sequence = ?1",
            params![sequence],
        )?;
        Ok(count > 0)
    }

    pub fn count_queue_entries(&self) -> DatabaseResult<usize> {
        let count: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM request_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete every queued row, returning how many were removed.
    pub fn clear_queue(&self) -> DatabaseResult<usize> {
        let count = self.connection().execute("DELETE FROM request_queue", [])?;
        Ok(count)
    }

    // ==========================================
    // Key/value store
    // ==========================================

    pub fn get_value(&self, key: &str) -> DatabaseResult<Option<String>> {
        let value = self
            .connection()
            .query_row(
                "SELECT value FROM key_value_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_value(&self, key: &str, value: &str) -> DatabaseResult<()> {
        let now = Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO key_value_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str) -> DatabaseResult<bool> {
        let count = self
            .connection()
            .execute("DELETE FROM key_value_store WHERE key = ?1", params![key])?;
        Ok(count > 0)
    }
}

impl KeyValueStore for Database {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        Ok(self.set_value(key, value)?)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.get_value(key)?)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.delete_value(key)?)
    }
}

fn map_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok(QueueRow {
        sequence: row.get(0)?,
        payload: row.get(1)?,
        inserted_at: parse_datetime(row.get::<_, String>(2)?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
