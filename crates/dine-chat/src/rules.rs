//! Deterministic replies that bypass or back up the model.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use dine_core::{MenuItem, Restaurant};
use dine_storage::{Collection, FindQuery, Predicate, RecordStore};

use crate::filter::{FilterValue, Filters};
use crate::response::format_price;
use crate::router::scoped_restaurant;
use crate::types::{IntentResult, QueryPlan};

const SUGGESTION_COUNT: usize = 3;
const NEAREST_BUDGET_COUNT: usize = 5;

static FAST_PATH: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let rule = |pattern: &str, reply: &'static str| {
        (Regex::new(pattern).expect("Invalid fast-path regex"), reply)
    };
    vec![
        rule(
            r"(?i)^\s*(?:hi|hello|hey|hiya|greetings|good\s+(?:morning|afternoon|evening))(?:\s+there)?[\s!.,]*$",
            "Hi! I can help you find restaurants, menus, opening hours and current deals. What are you in the mood for?",
        ),
        rule(
            r"(?i)^\s*(?:thanks|thank\s+you|thx|ty|cheers)(?:\s+(?:so\s+much|a\s+lot|very\s+much))?[\s!.,]*$",
            "You're welcome! Let me know if you'd like more suggestions.",
        ),
        rule(
            r"(?i)^\s*(?:help|what\s+can\s+you\s+do|how\s+does\s+this\s+work)[\s?!.]*$",
            "You can ask me things like \"Is KFC open now?\", \"Show me the menu at Pho 24\", \"Any deals today?\" or \"Somewhere romantic and quiet\".",
        ),
        rule(
            r"(?i)^\s*(?:yes|yeah|yep|ok|okay|sure|alright)[\s!.,]*$",
            "Great! Tell me what you're looking for and I'll find a few options.",
        ),
        rule(
            r"(?i)^\s*(?:no|nope|nah|no\s+thanks)[\s!.,]*$",
            "No problem. I'm here whenever you want to look something up.",
        ),
    ]
});

/// Rule-based replies: instant answers to small talk and recovery when
/// retrieval comes back empty or broken.
pub struct RuleEngine {
    store: Arc<dyn RecordStore>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// A fixed reply for greetings, thanks, help requests and bare
    /// acknowledgments. The whole message must match.
    pub fn fast_path(&self, message: &str) -> Option<String> {
        FAST_PATH
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, reply)| reply.to_string())
    }

    /// A recovery reply when the plan produced nothing usable, `None` when
    /// the results should be composed normally. `budget_filters` are the
    /// filters of a price-capped menu search, if the plan had one.
    pub async fn recover(
        &self,
        plan: &QueryPlan,
        results: &[IntentResult],
        budget_filters: Option<&Filters>,
    ) -> Option<String> {
        if !results.is_empty() && results.iter().all(IntentResult::is_failed) {
            debug!(intents = results.len(), "All intents failed, recovering");
            return Some(self.outage_reply().await);
        }

        let nothing_found = plan.is_empty() || results.iter().all(|r| r.records.is_empty());
        if !nothing_found {
            return None;
        }

        if let Some(filters) = budget_filters {
            if let Some(reply) = self.nearest_budget_reply(filters).await {
                return Some(reply);
            }
        }
        Some(self.no_results_reply().await)
    }

    async fn suggestions(&self) -> Vec<String> {
        let query = FindQuery::new(Collection::Restaurants)
            .filter(Predicate::equals_ignore_case("status", "active"))
            .limit(SUGGESTION_COUNT);
        match self.store.find(&query).await {
            Ok(docs) => docs
                .into_iter()
                .filter_map(|d| serde_json::from_value::<Restaurant>(d).ok())
                .map(|r| r.name)
                .collect(),
            Err(e) => {
                debug!(error = %e, "Suggestion lookup failed");
                Vec::new()
            }
        }
    }

    async fn outage_reply(&self) -> String {
        let names = self.suggestions().await;
        if names.is_empty() {
            "Sorry, I'm having trouble looking that up right now. Please try again in a moment."
                .to_string()
        } else {
            format!(
                "Sorry, I'm having trouble looking that up right now. In the meantime, you might like {}.",
                join_names(&names)
            )
        }
    }

    async fn no_results_reply(&self) -> String {
        let names = self.suggestions().await;
        if names.is_empty() {
            "Sorry, I couldn't find anything matching that. Try a different cuisine, area or price range."
                .to_string()
        } else {
            format!(
                "Sorry, I couldn't find anything matching that. You could try {}, or broaden your search with a different cuisine, area or price range.",
                join_names(&names)
            )
        }
    }

    /// Items nearest the budget, offered when a price-capped menu search
    /// came back empty. A search scoped to one restaurant only ever offers
    /// that restaurant's items.
    async fn nearest_budget_reply(&self, filters: &Filters) -> Option<String> {
        let budget = filters.get("price").and_then(FilterValue::bounds)?.1?;
        let scope = match scoped_restaurant(self.store.as_ref(), filters).await {
            Ok(Some(scope)) => scope,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Nearest-budget scope lookup failed");
                return None;
            }
        };
        match scope {
            Some(restaurant) => self.nearest_at(&restaurant, budget).await,
            None => self.cheapest_anywhere(budget).await,
        }
    }

    async fn nearest_at(&self, restaurant: &Restaurant, budget: f64) -> Option<String> {
        let query = FindQuery::new(Collection::MenuItems)
            .filter(Predicate::eq("restaurantId", restaurant.id.as_str()))
            .sort_asc("price");
        let mut items = self.available_items(&query).await?;
        if items.is_empty() {
            debug!(restaurant = %restaurant.name, "No available items for a budget suggestion");
            return None;
        }
        items.sort_by(|a, b| (a.price - budget).abs().total_cmp(&(b.price - budget).abs()));
        items.truncate(NEAREST_BUDGET_COUNT);

        let lines: Vec<String> = items
            .iter()
            .map(|item| format!("- {}, {}", item.name, format_price(item.price)))
            .collect();
        Some(format!(
            "{} has nothing under {}, but these are the closest options:\n{}",
            restaurant.name,
            format_price(budget),
            lines.join("\n")
        ))
    }

    async fn cheapest_anywhere(&self, budget: f64) -> Option<String> {
        let query = FindQuery::new(Collection::MenuItems).sort_asc("price");
        let mut items = self.available_items(&query).await?;
        if items.is_empty() {
            return None;
        }
        items.truncate(NEAREST_BUDGET_COUNT);

        let names = self
            .restaurant_names(items.iter().map(|i| i.restaurant_id.clone()).collect())
            .await;
        let lines: Vec<String> = items
            .iter()
            .map(|item| match names.iter().find(|(id, _)| *id == item.restaurant_id) {
                Some((_, restaurant)) => {
                    format!("- {}, {} ({})", item.name, format_price(item.price), restaurant)
                }
                None => format!("- {}, {}", item.name, format_price(item.price)),
            })
            .collect();
        Some(format!(
            "I couldn't find anything under {}, but these are the closest options:\n{}",
            format_price(budget),
            lines.join("\n")
        ))
    }

    async fn available_items(&self, query: &FindQuery) -> Option<Vec<MenuItem>> {
        match self.store.find(query).await {
            Ok(docs) => Some(
                docs.into_iter()
                    .filter_map(|d| serde_json::from_value::<MenuItem>(d).ok())
                    .filter(|i| i.availability)
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "Nearest-budget lookup failed");
                None
            }
        }
    }

    async fn restaurant_names(&self, ids: Vec<String>) -> Vec<(String, String)> {
        let query = FindQuery::new(Collection::Restaurants).filter(Predicate::IdIn(ids));
        self.store
            .find(&query)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|d: Value| serde_json::from_value::<Restaurant>(d).ok())
            .map(|r| (r.id, r.name))
            .collect()
    }
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}
