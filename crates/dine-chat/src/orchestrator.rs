//! Chat orchestrator: sequences one conversational turn.
//!
//! fast path → intent detection → normalization and session merge →
//! retrieval → recovery or composition → persistence.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use dine_core::config::{ChatConfig, LlmConfig};
use dine_core::{ChatMessage, Role};
use dine_storage::{Database, MessageRepository, RecordStore, SessionRepository};

use crate::completion::{CompletionService, RetryPolicy};
use crate::detector::IntentDetector;
use crate::error::ChatError;
use crate::filter::filters_to_json;
use crate::normalizer::normalize;
use crate::response::ResponseComposer;
use crate::router::{Clock, QueryRouter};
use crate::rules::RuleEngine;
use crate::session::{context_for, merge, SessionFilterStore};
use crate::types::{Intent, QueryPlan};

/// Reply to one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub response: String,
    pub session_id: String,
    /// The executed plan; absent for fast-path replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_intents: Option<QueryPlan>,
}

/// A new random 128-bit session id, hex encoded.
pub fn new_session_id() -> String {
    hex::encode(rand::rng().random::<[u8; 16]>())
}

/// Central coordinator for the conversational pipeline.
pub struct ChatOrchestrator {
    rules: RuleEngine,
    detector: IntentDetector,
    router: QueryRouter,
    composer: ResponseComposer,
    sessions: SessionFilterStore,
    messages: MessageRepository,
    max_message_length: usize,
    history_turns: usize,
}

impl ChatOrchestrator {
    /// Wire the pipeline from configuration.
    pub fn new(
        chat: &ChatConfig,
        llm: &LlmConfig,
        store: Arc<dyn RecordStore>,
        db: Arc<Database>,
        completion: Arc<dyn CompletionService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retry = RetryPolicy::from_config(llm);
        Self {
            rules: RuleEngine::new(store.clone()),
            detector: IntentDetector::new(completion.clone(), retry),
            router: QueryRouter::new(store, clock, chat.utc_offset_hours),
            composer: ResponseComposer::new(completion, retry, chat.max_prompt_records, chat.history_turns),
            sessions: SessionFilterStore::new(
                SessionRepository::new(db.clone()),
                Duration::hours(i64::from(chat.session_ttl_hours)),
                chat.session_cache_capacity,
            ),
            messages: MessageRepository::new(db),
            max_message_length: chat.max_message_length,
            history_turns: chat.history_turns,
        }
    }

    /// Issue a fresh session id. Nothing is stored until the first turn.
    pub fn create_session(&self) -> String {
        new_session_id()
    }

    /// Conversation so far, oldest first.
    pub fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        Ok(self.messages.recent(session_id, limit)?)
    }

    /// Handle one user message.
    ///
    /// Only invalid input is an error. Every other failure below this point
    /// is logged and answered with a natural-language reply.
    pub async fn handle_turn(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<TurnResponse, ChatError> {
        // Validate message
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }

        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => new_session_id(),
        };

        // Small talk never reaches retrieval or the model.
        if let Some(reply) = self.rules.fast_path(message) {
            debug!(session_id = %session_id, "Fast-path reply");
            self.sessions.get_or_create(&session_id);
            self.record_exchange(&session_id, message, &reply, None);
            return Ok(TurnResponse {
                response: reply,
                session_id,
                detected_intents: None,
            });
        }

        let session = self.sessions.get_or_create(&session_id);
        let history = self.recent_history(&session_id);

        // Detect, then scope each intent with what the session remembers
        let detected = self.detector.detect(message, Some(&session.filters)).await;
        let plan = QueryPlan {
            intents: detected
                .intents
                .into_iter()
                .map(|intent| {
                    let filters = normalize(intent.target, &intent.filters);
                    let context = context_for(intent.target, &session.filters);
                    Intent::new(intent.target, merge(&context, &filters), intent.limit)
                })
                .collect(),
        };

        let results = self.router.execute(&plan).await;

        let budget_filters = plan.budget_menu_filters();
        let reply = match self.rules.recover(&plan, &results, budget_filters).await {
            Some(reply) => reply,
            None => self.composer.compose(message, &plan, &results, &history).await,
        };

        // Remember filters from intents that actually ran
        for result in results.iter().filter(|r| !r.is_failed()) {
            self.sessions.persist(&session_id, &result.intent.filters);
        }
        self.record_exchange(&session_id, message, &reply, Some(&plan));

        info!(
            session_id = %session_id,
            intents = plan.intents.len(),
            records = results.iter().map(|r| r.records.len()).sum::<usize>(),
            "Turn handled"
        );

        Ok(TurnResponse {
            response: reply,
            session_id,
            detected_intents: Some(plan),
        })
    }

    fn recent_history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.messages
            .recent(session_id, self.history_turns)
            .unwrap_or_else(|e| {
                warn!(error = %e, session_id, "Failed to load history");
                Vec::new()
            })
    }

    fn record_exchange(&self, session_id: &str, user: &str, reply: &str, plan: Option<&QueryPlan>) {
        let now = Utc::now();
        let meta = match plan {
            Some(plan) => json!({
                "intents": plan
                    .intents
                    .iter()
                    .map(|i| json!({"target": i.target.as_str(), "filters": filters_to_json(&i.filters)}))
                    .collect::<Vec<_>>()
            }),
            None => json!({"fastPath": true}),
        };
        let exchange = [
            ChatMessage {
                session_id: session_id.to_string(),
                role: Role::User,
                content: user.to_string(),
                meta: json!({}),
                created_at: now,
            },
            ChatMessage {
                session_id: session_id.to_string(),
                role: Role::Assistant,
                content: reply.to_string(),
                meta,
                created_at: now,
            },
        ];
        for message in &exchange {
            if let Err(e) = self.messages.append(message) {
                warn!(error = %e, session_id, "Failed to store chat message");
            }
        }
    }
}
