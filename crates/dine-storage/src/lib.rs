//! Dine Storage crate - SQLite session persistence and the record store.
//!
//! Provides a WAL-mode SQLite database with migrations for chat sessions and
//! messages, plus the `RecordStore` contract the query router reads
//! restaurants, menus, promotions and opening hours through.

pub mod db;
pub mod migrations;
pub mod records;
pub mod repository;

pub use db::Database;
pub use records::{Collection, FindQuery, Fixtures, MemoryRecordStore, Predicate, RecordStore};
pub use repository::{MessageRepository, SessionRepository};
