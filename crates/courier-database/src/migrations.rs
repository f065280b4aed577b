//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_request_queue(conn)?;
    }
    if current_version < 2 {
        migrate_v2_key_value_store(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: request queue. AUTOINCREMENT keeps sequences from ever being reused,
/// even after the highest row is deleted.
fn migrate_v1_request_queue(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: request queue");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS request_queue (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            payload BLOB NOT NULL,
            inserted_at TEXT NOT NULL
        );
        ",
    )?;

    record_migration(conn, 1, "request_queue")
}

/// V2: key/value store for cached identity and configuration values.
fn migrate_v2_key_value_store(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: key value store");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS key_value_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        ",
    )?;

    record_migration(conn, 2, "key_value_store")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_recorded_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_VERSION);
    }
}
