//! dine application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration (file, then env, then flags)
//! 2. Load the record store from the fixture file
//! 3. Open the session database
//! 4. Build the completion client and the chat orchestrator
//! 5. Serve the HTTP API
//!
//! Missing fixtures, an unusable database or a missing API key are logged
//! and the service starts degraded instead of exiting.

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use dine_api::{start_server, AppState};
use dine_chat::{ChatOrchestrator, CompletionService, OpenAiCompatClient, SystemClock};
use dine_core::DineConfig;
use dine_storage::{Collection, Database, MemoryRecordStore};

use cli::{expand_home, CliArgs};

fn load_records(fixtures: Option<&str>) -> MemoryRecordStore {
    let Some(path) = fixtures else {
        tracing::warn!("No fixture file configured; the restaurant directory is empty");
        return MemoryRecordStore::empty();
    };
    let path = expand_home(path);
    match MemoryRecordStore::from_fixture_file(&path) {
        Ok(store) => {
            tracing::info!(
                path = %path.display(),
                restaurants = store.len(Collection::Restaurants),
                menu_items = store.len(Collection::MenuItems),
                promotions = store.len(Collection::Promotions),
                "Record store loaded"
            );
            store
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to load fixtures; the restaurant directory is empty");
            MemoryRecordStore::empty()
        }
    }
}

fn open_database(path: &Path) -> Result<Database, dine_core::DineError> {
    match Database::new(path) {
        Ok(db) => Ok(db),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open session database; sessions will not survive a restart");
            Database::in_memory()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = DineConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    if let Some(port) = args.port {
        config.general.port = port;
    }
    if let Some(fixtures) = args.resolve_fixtures() {
        config.store.fixtures_path = Some(fixtures);
    }
    if let Some(database) = args.resolve_database() {
        config.store.database_path = database;
    }

    // Tracing.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting dine v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let records = load_records(config.store.fixtures_path.as_deref());
    let restaurant_count = records.len(Collection::Restaurants);
    let db = Arc::new(open_database(&expand_home(&config.store.database_path))?);

    // Pipeline.
    let completion = OpenAiCompatClient::from_config(&config.llm);
    let llm_configured = completion.is_configured();
    if llm_configured {
        tracing::info!(model = %config.llm.model, base_url = %config.llm.base_url, "Completion client ready");
    }

    let orchestrator = ChatOrchestrator::new(
        &config.chat,
        &config.llm,
        Arc::new(records),
        db,
        completion,
        Arc::new(SystemClock),
    );

    // API server.
    let state = AppState::new(config.clone(), orchestrator, restaurant_count, llm_configured);
    start_server(&config, state).await?;

    Ok(())
}
