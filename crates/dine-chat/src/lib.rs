//! Dine Chat crate - the conversational query pipeline.
//!
//! A turn flows through the rule engine fast path, intent detection
//! (keyword stage, then model stage), filter normalization and session
//! merging, the query router, recovery rules and finally the response
//! composer. [`ChatOrchestrator`] sequences the whole thing.

pub mod completion;
pub mod detector;
pub mod error;
pub mod filter;
pub mod normalizer;
pub mod orchestrator;
pub mod response;
pub mod router;
pub mod rules;
pub mod session;
pub mod types;

pub use completion::{
    CompletionError, CompletionRequest, CompletionService, OfflineCompletion, OpenAiCompatClient,
    RetryPolicy, Turn,
};
pub use detector::IntentDetector;
pub use error::ChatError;
pub use filter::{FilterValue, Filters, Scalar};
pub use orchestrator::{ChatOrchestrator, TurnResponse};
pub use response::ResponseComposer;
pub use router::{Clock, FixedClock, QueryRouter, SystemClock};
pub use rules::RuleEngine;
pub use session::{SessionCache, SessionFilterStore};
pub use types::{Intent, IntentResult, QueryPlan, Record, Target, MAX_INTENT_LIMIT};
