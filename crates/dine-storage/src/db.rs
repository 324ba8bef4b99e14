//! Database connection management.
//!
//! A single rusqlite Connection behind a Mutex. WAL mode and the session
//! schema are set up on open.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use dine_core::DineError;

use crate::migrations;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA busy_timeout = 5000;";

/// Thread-safe SQLite handle for sessions and messages.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file, creating parent directories and
    /// running pending migrations.
    pub fn new(path: &Path) -> Result<Self, DineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| DineError::Storage(format!("Failed to open database: {}", e)))?;
        let db = Self::init(conn)?;
        info!("Session database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (tests and degraded mode).
    pub fn in_memory() -> Result<Self, DineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DineError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DineError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| DineError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run a closure against the connection while holding the lock.
    ///
    /// Everything inside one closure is serialized against every other
    /// caller, which the session repository relies on for read-merge-write.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DineError>
    where
        F: FnOnce(&Connection) -> Result<T, DineError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DineError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_sessions(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                .map_err(|e| DineError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_sessions(&db), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(count_sessions(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        drop(Database::new(&path).unwrap());
        let db = Database::new(&path).unwrap();
        assert_eq!(count_sessions(&db), 0);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| DineError::Storage(e.to_string()))?;
            // In-memory databases report "memory" instead of "wal".
            assert!(mode == "wal" || mode == "memory", "got: {}", mode);
            Ok(())
        })
        .unwrap();
    }
}
