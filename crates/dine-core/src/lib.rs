//! Shared configuration, error and record types for the dine workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::DineConfig;
pub use error::{DineError, Result};
pub use types::*;
