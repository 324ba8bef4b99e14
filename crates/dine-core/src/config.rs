use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DineError, Result};

/// Top-level configuration for the dine service.
///
/// Loaded from `~/.dine/config.toml` by default. Every section falls back to
/// its defaults so a partial (or missing) file still yields a usable config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DineConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl DineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DineConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply environment variable overrides on top of the file values.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("DINE_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.general.port = p,
                Err(e) => warn!(value = %port, error = %e, "Ignoring invalid DINE_PORT"),
            }
        }
        if let Some(path) = lookup("DINE_FIXTURES") {
            self.store.fixtures_path = Some(path);
        }
        if let Some(path) = lookup("DINE_DB_PATH") {
            self.store.database_path = path;
        }
        if let Some(key) = lookup("LLM_API_KEY").or_else(|| lookup("DEEPSEEK_API_KEY")) {
            if !key.trim().is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(model) = lookup("LLM_MODEL").or_else(|| lookup("DEEPSEEK_MODEL")) {
            self.llm.model = model;
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Interface the HTTP server binds to.
    pub host: String,
    /// HTTP listen port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Record store and session persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON fixture file the in-memory record store is loaded from.
    pub fixtures_path: Option<String>,
    /// SQLite file holding chat sessions and messages.
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fixtures_path: None,
            database_path: "~/.dine/chat.db".to_string(),
        }
    }
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    /// API key; the service runs in degraded mode without one.
    pub api_key: Option<String>,
    /// Model name sent with every request.
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum attempts per completion (first try included).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
        }
    }
}

/// Conversational pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Longest accepted user message, in characters.
    pub max_message_length: usize,
    /// Number of recent messages handed to the response composer.
    pub history_turns: usize,
    /// Hours a session stays alive after its last activity.
    pub session_ttl_hours: u32,
    /// Maximum sessions kept in the in-process cache.
    pub session_cache_capacity: usize,
    /// Upper bound applied to every intent limit.
    pub max_intent_limit: usize,
    /// Records embedded in the composition prompt.
    pub max_prompt_records: usize,
    /// UTC offset (hours) used to evaluate opening hours.
    pub utc_offset_hours: i32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            history_turns: 4,
            session_ttl_hours: 24,
            session_cache_capacity: 1024,
            max_intent_limit: 50,
            max_prompt_records: 15,
            utc_offset_hours: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = DineConfig::default();
        assert_eq!(config.general.port, 5000);
        assert_eq!(config.general.log_level, "info");
        assert!(config.store.fixtures_path.is_none());
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.chat.utc_offset_hours, 7);
        assert_eq!(config.chat.max_prompt_records, 15);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
port = 8080
log_level = "debug"

[store]
fixtures_path = "/srv/dine/fixtures.json"
database_path = "/srv/dine/chat.db"

[llm]
model = "gpt-4o-mini"
max_attempts = 5

[chat]
history_turns = 6
"#;
        let file = create_temp_config(content);
        let config = DineConfig::load(file.path()).unwrap();
        assert_eq!(config.general.port, 8080);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(
            config.store.fixtures_path.as_deref(),
            Some("/srv/dine/fixtures.json")
        );
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_attempts, 5);
        // Unspecified keys keep their defaults.
        assert_eq!(config.llm.base_delay_ms, 500);
        assert_eq!(config.chat.history_turns, 6);
        assert_eq!(config.chat.max_intent_limit, 50);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = DineConfig::load(file.path()).unwrap();
        assert_eq!(config.general.port, 5000);
        assert_eq!(config.chat.session_ttl_hours, 24);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[general\nport = ");
        let err = DineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, DineError::Config(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = DineConfig::load_or_default(Path::new("/nonexistent/dine.toml"));
        assert_eq!(config.general.port, 5000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = DineConfig::default();
        config.general.port = 9090;
        config.llm.model = "custom-model".to_string();
        config.save(&path).unwrap();

        let loaded = DineConfig::load(&path).unwrap();
        assert_eq!(loaded.general.port, 9090);
        assert_eq!(loaded.llm.model, "custom-model");
    }

    // ---- Environment overrides ----

    #[test]
    fn test_overrides_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DINE_PORT", "7070"),
            ("DINE_FIXTURES", "/tmp/fixtures.json"),
            ("DINE_DB_PATH", "/tmp/chat.db"),
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("LLM_MODEL", "deepseek-reasoner"),
        ]);
        let mut config = DineConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.general.port, 7070);
        assert_eq!(config.store.fixtures_path.as_deref(), Some("/tmp/fixtures.json"));
        assert_eq!(config.store.database_path, "/tmp/chat.db");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "deepseek-reasoner");
    }

    #[test]
    fn test_invalid_port_override_ignored() {
        let mut config = DineConfig::default();
        config.apply_overrides_from(|k| (k == "DINE_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.general.port, 5000);
    }

    #[test]
    fn test_blank_api_key_ignored() {
        let mut config = DineConfig::default();
        config.apply_overrides_from(|k| (k == "LLM_API_KEY").then(|| "  ".to_string()));
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_llm_api_key_takes_precedence() {
        let mut config = DineConfig::default();
        config.apply_overrides_from(|k| match k {
            "LLM_API_KEY" => Some("primary".to_string()),
            "DEEPSEEK_API_KEY" => Some("secondary".to_string()),
            _ => None,
        });
        assert_eq!(config.llm.api_key.as_deref(), Some("primary"));
    }
}
