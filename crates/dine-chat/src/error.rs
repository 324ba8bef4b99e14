//! Error types for the conversational pipeline.
//!
//! Only input validation escapes the orchestrator; everything else is
//! logged and turned into a natural-language reply.

use dine_core::DineError;

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("query error: {0}")]
    Query(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DineError> for ChatError {
    fn from(err: DineError) -> Self {
        match err {
            DineError::Query(msg) => ChatError::Query(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}
