//! HTTP surface for the restaurant chat service.
//!
//! Exposes the chat turn, session issue and health endpoints over axum.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
