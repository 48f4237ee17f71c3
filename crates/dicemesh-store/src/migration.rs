//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system: each migration transforms the
//! schema from version N to N+1 inside one transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the event log tables.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Event log entries: one row per event
        CREATE TABLE event_log_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            event_id TEXT(128) NOT NULL,          -- uppercase-hex SHA-256
            event_type TEXT(64) NOT NULL,         -- EventKind wire number
            payload TEXT NOT NULL,                -- canonical body JSON
            parents TEXT NOT NULL,                -- JSON array of parent ids
            vector_clock TEXT NOT NULL,           -- JSON object
            lamport_clock INTEGER NOT NULL,
            created_at INTEGER NOT NULL,          -- producer timestamp (Unix ms)
            is_imported INTEGER NOT NULL DEFAULT 0,

            UNIQUE(session_id, event_id)
        );

        -- Parent edges: one row per (child, parent)
        CREATE TABLE event_log_edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            event_id TEXT(128) NOT NULL,
            parent_id TEXT(128) NOT NULL
        );

        CREATE INDEX idx_edges_session_event ON event_log_edges(session_id, event_id);
        CREATE INDEX idx_edges_session_parent ON event_log_edges(session_id, parent_id);
        CREATE INDEX idx_entries_session_lamport ON event_log_entries(session_id, lamport_clock);
        CREATE INDEX idx_entries_event_id ON event_log_entries(event_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
