//! Shared application state passed to all handlers.

use std::sync::Arc;
use std::time::Instant;

use dine_chat::ChatOrchestrator;
use dine_core::DineConfig;

/// State cloned into every handler. All fields are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration after env and CLI overrides.
    pub config: Arc<DineConfig>,
    /// The conversational pipeline.
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Number of restaurants loaded at startup, reported by `/health`.
    pub restaurant_count: usize,
    /// Whether a completion backend is configured.
    pub llm_configured: bool,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: DineConfig,
        orchestrator: ChatOrchestrator,
        restaurant_count: usize,
        llm_configured: bool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            restaurant_count,
            llm_configured,
            start_time: Instant::now(),
        }
    }
}
