//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use dine_core::DineError;

/// Run all pending migrations in order.
pub fn run_migrations(conn: &Connection) -> Result<(), DineError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| DineError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = current_version(conn)?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: sessions_and_messages");
    }

    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64, DineError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| DineError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1: chat sessions and their message log.
fn apply_v1(conn: &Connection) -> Result<(), DineError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            session_id  TEXT PRIMARY KEY NOT NULL,
            filters     TEXT NOT NULL DEFAULT '{}',
            last_seen   INTEGER NOT NULL,
            expires_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_expires_at
            ON sessions (expires_at);

        -- Messages are append-only; the autoincrement id is the turn order.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content     TEXT NOT NULL,
            meta        TEXT NOT NULL DEFAULT '{}',
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages (session_id, id DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'sessions_and_messages');
        ",
    )
    .map_err(|e| DineError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
