//! Language-model completion client and the shared retry policy.
//!
//! The pipeline only depends on [`CompletionService`]. Production uses
//! [`OpenAiCompatClient`] against any OpenAI-compatible chat completions
//! endpoint; without an API key the binary wires in [`OfflineCompletion`],
//! whose "not configured" error makes every caller take its deterministic
//! path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dine_core::config::LlmConfig;
use dine_core::Role;

/// One prior conversation turn handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// A single completion call: system instructions, optional context turns
/// and the user prompt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub prior_turns: Vec<Turn>,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service is not configured")]
    NotConfigured,
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },
    #[error("completion returned no content")]
    EmptyOutput,
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Transient overload or connectivity failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Transport { retryable, .. } => *retryable,
            CompletionError::Http { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CompletionError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Whether calls can succeed at all.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Stand-in used when no API key is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineCompletion;

#[async_trait]
impl CompletionService for OfflineCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Err(CompletionError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

// =============================================================================
// Retry policy
// =============================================================================

/// Bounded exponential backoff for completion calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Run once, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based): base, 2x, 4x, ...
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. A server-supplied `Retry-After` replaces the
    /// computed delay, still capped at `max_delay`.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T, CompletionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CompletionError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.delay_for(attempt))
                        .min(self.max_delay);
                    warn!(
                        operation = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// =============================================================================
// OpenAI-compatible HTTP client
// =============================================================================

/// Chat completions client for OpenAI-compatible APIs (DeepSeek, OpenAI, ...).
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport {
                message: format!("Failed to build HTTP client: {e}"),
                retryable: false,
            })?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// The configured client, or [`OfflineCompletion`] when no key is set
    /// or the client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Arc<dyn CompletionService> {
        let Some(api_key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            warn!("No completion API key configured; replies will use deterministic fallbacks");
            return Arc::new(OfflineCompletion);
        };
        match Self::new(
            &config.base_url,
            api_key,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "Completion client unavailable; running degraded");
                Arc::new(OfflineCompletion)
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatCompletionBody<'a> {
        let mut messages = Vec::with_capacity(request.prior_turns.len() + 2);
        if !request.system.is_empty() {
            messages.push(WireMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.extend(request.prior_turns.iter().map(|t| WireMessage {
            role: t.role.as_str(),
            content: &t.content,
        }));
        messages.push(WireMessage {
            role: "user",
            content: &request.prompt,
        });
        ChatCompletionBody {
            model: &self.model,
            messages,
        }
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = self.build_body(request);
        debug!(endpoint = %self.endpoint, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| CompletionError::Transport {
                message: format!("completion request failed: {err}"),
                retryable: err.is_connect() || err.is_timeout(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::InvalidResponse(err.to_string()))?;
        extract_text(parsed)
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn extract_text(response: ChatCompletionResponse) -> Result<String, CompletionError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(CompletionError::EmptyOutput)
}

fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> CompletionError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.to_string());

    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    CompletionError::Http {
        status: status.as_u16(),
        message,
        retryable,
        retry_after,
    }
}

/// Seconds form only; HTTP-date values are ignored.
fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// =============================================================================
// Test double
// =============================================================================
