//! SQLite-backed session and message repositories.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{OptionalExtension, Row};
use serde_json::Value;

use dine_core::{ChatMessage, DineError, Role, SessionRecord};

use crate::db::Database;

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn parse_json_column(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let filters: String = row.get(1)?;
    Ok(SessionRecord {
        session_id: row.get(0)?,
        filters: parse_json_column(&filters),
        last_seen: from_millis(row.get(2)?),
        expires_at: from_millis(row.get(3)?),
    })
}

fn select_session(
    conn: &rusqlite::Connection,
    session_id: &str,
) -> Result<Option<SessionRecord>, DineError> {
    conn.query_row(
        "SELECT session_id, filters, last_seen, expires_at FROM sessions WHERE session_id = ?1",
        rusqlite::params![session_id],
        row_to_session,
    )
    .optional()
    .map_err(|e| DineError::Storage(format!("Failed to load session: {}", e)))
}

/// Repository for per-conversation filter state.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load a session by id, expired or not.
    pub fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, DineError> {
        self.db.with_conn(|conn| select_session(conn, session_id))
    }

    /// Create a session with empty filters, resetting any stale row that
    /// already uses the id.
    pub fn create(&self, session_id: &str, ttl: Duration) -> Result<SessionRecord, DineError> {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: session_id.to_string(),
            filters: Value::Object(Default::default()),
            last_seen: now,
            expires_at: now + ttl,
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, filters, last_seen, expires_at)
                 VALUES (?1, '{}', ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                    filters = '{}', last_seen = excluded.last_seen, expires_at = excluded.expires_at",
                rusqlite::params![session_id, to_millis(record.last_seen), to_millis(record.expires_at)],
            )
            .map_err(|e| DineError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Atomically recompute a session's filters from the stored copy.
    ///
    /// `merge` receives the freshest persisted filters (`{}` when the row is
    /// missing) and returns the value to store. The read and the write happen
    /// under one connection lock, so concurrent turns on the same session
    /// always merge against each other's output.
    pub fn update_filters<F>(
        &self,
        session_id: &str,
        ttl: Duration,
        merge: F,
    ) -> Result<SessionRecord, DineError>
    where
        F: FnOnce(&Value) -> Value,
    {
        self.db.with_conn(|conn| {
            let current = select_session(conn, session_id)?
                .map(|s| s.filters)
                .unwrap_or_else(|| Value::Object(Default::default()));
            let merged = merge(&current);
            let now = Utc::now();
            let expires_at = now + ttl;
            let serialized = serde_json::to_string(&merged)?;

            conn.execute(
                "INSERT INTO sessions (session_id, filters, last_seen, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    filters = excluded.filters,
                    last_seen = excluded.last_seen,
                    expires_at = excluded.expires_at",
                rusqlite::params![session_id, serialized, to_millis(now), to_millis(expires_at)],
            )
            .map_err(|e| DineError::Storage(format!("Failed to update session: {}", e)))?;

            Ok(SessionRecord {
                session_id: session_id.to_string(),
                filters: merged,
                last_seen: now,
                expires_at,
            })
        })
    }

    /// Refresh `last_seen` and push the expiry out by `ttl`.
    pub fn touch(&self, session_id: &str, ttl: Duration) -> Result<bool, DineError> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET last_seen = ?2, expires_at = ?3 WHERE session_id = ?1",
                    rusqlite::params![session_id, to_millis(now), to_millis(now + ttl)],
                )
                .map_err(|e| DineError::Storage(format!("Failed to touch session: {}", e)))?;
            Ok(changed > 0)
        })
    }
}

/// Append-only message log.
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn append(&self, message: &ChatMessage) -> Result<(), DineError> {
        let meta = serde_json::to_string(&message.meta)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (session_id, role, content, meta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.session_id,
                    message.role.as_str(),
                    message.content,
                    meta,
                    to_millis(message.created_at),
                ],
            )
            .map_err(|e| DineError::Storage(format!("Failed to append message: {}", e)))?;
            Ok(())
        })
    }

    /// The `limit` most recent messages of a session, oldest first.
    pub fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, DineError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, role, content, meta, created_at
                     FROM messages
                     WHERE session_id = ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                )
                .map_err(|e| DineError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![session_id, limit as i64], |row| {
                    let role: String = row.get(1)?;
                    let meta: String = row.get(3)?;
                    Ok(ChatMessage {
                        session_id: row.get(0)?,
                        role: Role::parse(&role).unwrap_or(Role::User),
                        content: row.get(2)?,
                        meta: parse_json_column(&meta),
                        created_at: from_millis(row.get(4)?),
                    })
                })
                .map_err(|e| DineError::Storage(e.to_string()))?;

            let mut messages = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| DineError::Storage(e.to_string()))?;
            messages.reverse();
            Ok(messages)
        })
    }
}
