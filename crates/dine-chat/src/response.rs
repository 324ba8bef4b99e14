//! Reply composition.
//!
//! The model turns retrieved records into a conversational answer. When it
//! is unavailable, fails, or returns nothing usable, the records are rendered
//! deterministically instead, so a turn with results always gets a reply.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use dine_core::ChatMessage;

use crate::completion::{CompletionRequest, CompletionService, RetryPolicy, Turn};
use crate::types::{IntentResult, OpenStatus, QueryPlan, Record};

/// Records rendered by the deterministic fallback.
const FALLBACK_RECORDS: usize = 10;

pub const NO_RESULTS_REPLY: &str =
    "Sorry, I couldn't find anything matching your request. Could you try asking in a different way?";

const PERSONA: &str = "You are a friendly local dining guide helping someone choose where to eat.
Answer using ONLY the records provided. Never invent restaurants, dishes, prices or hours.
Style rules:
- Write plain conversational text. No markdown, no bold, no headings, no tables.
- Use simple dashes for lists.
- Never mention databases, records, JSON, fields, filters, queries or IDs.
- Keep it short: a one-line answer, then at most a few list lines.
- Prices are in US dollars. Times are local.
- If several restaurants match, mention what makes each one a good fit.";

/// `$4.50`, or `$8` for whole amounts.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("${}", price as i64)
    } else {
        format!("${:.2}", price)
    }
}

// =============================================================================
// Markdown cleanup
// =============================================================================

static MARKDOWN_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let rule = |pattern: &str, replacement: &'static str| {
        (Regex::new(pattern).expect("Invalid markdown regex"), replacement)
    };
    vec![
        rule(r"(?m)^\s*```[a-zA-Z]*\s*$", ""),
        rule(r"(?m)^#{1,6}\s*", ""),
        rule(r"\*\*(.+?)\*\*", "$1"),
        rule(r"__(.+?)__", "$1"),
        rule(r"`([^`]*)`", "$1"),
        rule(r"\[([^\]]+)\]\([^)]*\)", "$1"),
        rule(r"(?m)^\s*[*•+]\s+", "- "),
        rule(r"(?m)^\s*\d+[.)]\s+", "- "),
        rule(r"(?m)^\s*\|?(?:\s*:?-{3,}:?\s*\|)+\s*:?-*:?\s*$", ""),
        rule(r"\n{3,}", "\n\n"),
    ]
});

/// Strip markdown the model emits despite instructions.
pub fn clean_markdown(text: &str) -> String {
    let mut cleaned = text.to_string();
    for (re, replacement) in MARKDOWN_RULES.iter() {
        cleaned = re.replace_all(&cleaned, *replacement).into_owned();
    }
    cleaned.trim().to_string()
}

// =============================================================================
// Deterministic rendering
// =============================================================================

fn open_status_sentence(status: &OpenStatus) -> String {
    let window = match (&status.open_time, &status.close_time) {
        (Some(open), Some(close)) => Some(format!("{} - {}", open, close)),
        _ => None,
    };
    match (status.is_open, window) {
        (true, Some(window)) => format!("{} is open now ({}).", status.restaurant_name, window),
        (true, None) => format!("{} is open now.", status.restaurant_name),
        (false, Some(window)) => format!(
            "{} is closed right now. Today's hours are {}.",
            status.restaurant_name, window
        ),
        (false, None) => format!("{} has no opening hours listed for today.", status.restaurant_name),
    }
}

fn at(restaurant_name: &Option<String>) -> String {
    restaurant_name
        .as_ref()
        .map(|name| format!(" at {}", name))
        .unwrap_or_default()
}

fn render_record(record: &Record) -> Vec<String> {
    match record {
        Record::Restaurant(view) => {
            let mut line = format!("- {}", view.restaurant.name);
            if let Some(today) = &view.today_hours {
                line.push_str(&format!(" (Today: {} - {})", today.open_time, today.close_time));
            }
            if !view.matching_items.is_empty() {
                let items: Vec<String> = view
                    .matching_items
                    .iter()
                    .map(|i| format!("{} {}", i.name, format_price(i.price)))
                    .collect();
                line.push_str(&format!(": {}", items.join(", ")));
            }
            vec![line]
        }
        Record::Menu(menu) => {
            let mut lines = vec![match &menu.restaurant_name {
                Some(name) => format!("{} ({}):", menu.menu.name, name),
                None => format!("{}:", menu.menu.name),
            }];
            lines.extend(
                menu.items
                    .iter()
                    .map(|i| format!("- {}, {}", i.name, format_price(i.price))),
            );
            lines
        }
        Record::MenuItem(view) => vec![format!(
            "- {}, {}{}",
            view.item.name,
            format_price(view.item.price),
            at(&view.restaurant_name)
        )],
        Record::Promotion(view) => {
            let discount = view.promotion.discount_percent;
            let mut line = if discount > 0.0 {
                format!("- {}, {}% off", view.promotion.title, discount.round() as i64)
            } else {
                format!("- {}", view.promotion.title)
            };
            line.push_str(&at(&view.restaurant_name));
            vec![line]
        }
        Record::OpenStatus(status) => vec![open_status_sentence(status)],
        Record::OpeningHours(view) => {
            let hours = match (&view.hours.open_time, &view.hours.close_time) {
                (Some(open), Some(close)) => format!("{} - {}", open, close),
                _ => "closed".to_string(),
            };
            let who = view
                .restaurant_name
                .as_ref()
                .map(|n| format!("{}, ", n))
                .unwrap_or_default();
            vec![format!("- {}{}: {}", who, view.hours.day_of_week, hours)]
        }
        Record::PriceTier(tier) => vec![format!(
            "- {}: dishes {} - {}, drinks {} - {}",
            tier.tier,
            format_price(tier.dish_min),
            format_price(tier.dish_max),
            format_price(tier.drink_min),
            format_price(tier.drink_max)
        )],
    }
}

/// Plain-text rendering of up to ten records.
pub fn render_fallback(results: &[IntentResult]) -> String {
    let records: Vec<&Record> = results
        .iter()
        .flat_map(|r| r.records.iter())
        .take(FALLBACK_RECORDS)
        .collect();
    if records.is_empty() {
        return NO_RESULTS_REPLY.to_string();
    }

    // A single status needs no list around it.
    if let [Record::OpenStatus(status)] = records.as_slice() {
        return open_status_sentence(status);
    }

    let mut lines = vec!["Here's what I found:".to_string()];
    lines.extend(records.into_iter().flat_map(render_record));
    lines.join("\n")
}

// =============================================================================
// Composer
// =============================================================================

pub struct ResponseComposer {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    max_records: usize,
    history_turns: usize,
}

impl ResponseComposer {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        retry: RetryPolicy,
        max_records: usize,
        history_turns: usize,
    ) -> Self {
        Self {
            completion,
            retry,
            max_records,
            history_turns,
        }
    }

    fn build_request(
        &self,
        message: &str,
        plan: &QueryPlan,
        results: &[IntentResult],
        history: &[ChatMessage],
    ) -> CompletionRequest {
        let records: Vec<&Record> = results
            .iter()
            .flat_map(|r| r.records.iter())
            .take(self.max_records)
            .collect();
        let records_json = serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string());
        let asked: Vec<&str> = plan.intents.iter().map(|i| i.target.as_str()).collect();

        let skip = history.len().saturating_sub(self.history_turns);
        let prior_turns = history[skip..]
            .iter()
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        CompletionRequest {
            system: PERSONA.to_string(),
            prior_turns,
            prompt: format!(
                "The user asked: \"{}\"\nThey were looking for: {}\n\nRecords:\n{}\n\nReply to the user.",
                message,
                asked.join(", "),
                records_json
            ),
        }
    }

    /// Compose a reply for `message` from `results`. `history` is the
    /// conversation so far, oldest first.
    pub async fn compose(
        &self,
        message: &str,
        plan: &QueryPlan,
        results: &[IntentResult],
        history: &[ChatMessage],
    ) -> String {
        if !self.completion.is_configured() {
            return render_fallback(results);
        }

        let request = self.build_request(message, plan, results, history);
        match self
            .retry
            .run("compose_response", || self.completion.complete(&request))
            .await
        {
            Ok(text) => {
                let cleaned = clean_markdown(&text);
                if cleaned.is_empty() {
                    debug!("Model reply empty after cleanup, using fallback");
                    render_fallback(results)
                } else {
                    cleaned
                }
            }
            Err(e) => {
                warn!(error = %e, "Response composition failed, using fallback");
                render_fallback(results)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletion;
    use crate::completion::{CompletionError, OfflineCompletion};
    use crate::filter::Filters;
    use crate::types::{Intent, MenuItemView, PromotionView, RestaurantView, Target, TodayHours};
    use chrono::Utc;
    use dine_core::{DayOfWeek, MenuItem, Promotion, Restaurant, Role};
    use serde_json::json;

    fn item_result() -> Vec<IntentResult> {
        let item = MenuItem {
            id: "i1".into(),
            name: "Zinger Burger".into(),
            price: 4.5,
            ..Default::default()
        };
        vec![IntentResult::ok(
            Intent::new(Target::Menu, Filters::new(), 20),
            vec![Record::MenuItem(MenuItemView {
                item,
                restaurant_name: Some("KFC Cambodia".into()),
            })],
        )]
    }

    fn composer(completion: Arc<dyn CompletionService>) -> ResponseComposer {
        ResponseComposer::new(completion, RetryPolicy::no_retry(), 15, 4)
    }

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            session_id: "s".into(),
            role,
            content: content.into(),
            meta: json!({}),
            created_at: Utc::now(),
        }
    }

    // ---- Formatting ----

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(8.0), "$8");
        assert_eq!(format_price(4.5), "$4.50");
        assert_eq!(format_price(0.25), "$0.25");
    }

    #[test]
    fn test_clean_markdown() {
        let raw = "## Options\n\n\n**KFC** is great\n* Zinger — `$4.50`\n1. Fries\nSee [menu](http://x)";
        assert_eq!(
            clean_markdown(raw),
            "Options\n\nKFC is great\n- Zinger — $4.50\n- Fries\nSee menu"
        );
    }

    // ---- Fallback ----

    #[test]
    fn test_fallback_lines() {
        let text = render_fallback(&item_result());
        assert_eq!(text, "Here's what I found:\n- Zinger Burger, $4.50 at KFC Cambodia");
    }

    #[test]
    fn test_fallback_promotion_and_hours() {
        let promotion: Promotion = serde_json::from_value(json!({
            "id": "p1", "restaurantId": "r1", "title": "Bucket Monday", "discountPercent": 20,
            "startDate": "2026-01-01T00:00:00Z", "endDate": "2026-12-31T00:00:00Z"
        }))
        .unwrap();
        let mut view = RestaurantView::plain(Restaurant {
            id: "r1".into(),
            name: "KFC Cambodia".into(),
            ..Default::default()
        });
        view.today_hours = Some(TodayHours {
            day: DayOfWeek::Mon,
            open_time: "09:00".into(),
            close_time: "22:00".into(),
        });
        let results = vec![IntentResult::ok(
            Intent::new(Target::Promotion, Filters::new(), 10),
            vec![
                Record::Promotion(PromotionView {
                    promotion,
                    restaurant_name: None,
                }),
                Record::Restaurant(view),
            ],
        )];
        let text = render_fallback(&results);
        assert!(text.contains("- Bucket Monday, 20% off"));
        assert!(text.contains("- KFC Cambodia (Today: 09:00 - 22:00)"));
    }

    #[test]
    fn test_fallback_open_status_sentence() {
        let status = OpenStatus {
            restaurant_id: "r1".into(),
            restaurant_name: "KFC Cambodia".into(),
            day: DayOfWeek::Mon,
            current_time: "23:15".into(),
            open_time: Some("09:00".into()),
            close_time: Some("22:00".into()),
            is_open: false,
        };
        let results = vec![IntentResult::ok(
            Intent::new(Target::IsOpenNow, Filters::new(), 1),
            vec![Record::OpenStatus(status)],
        )];
        assert_eq!(
            render_fallback(&results),
            "KFC Cambodia is closed right now. Today's hours are 09:00 - 22:00."
        );
    }

    #[test]
    fn test_fallback_caps_records() {
        let records = (0..25)
            .map(|n| {
                Record::MenuItem(MenuItemView {
                    item: MenuItem {
                        name: format!("Dish {}", n),
                        price: 1.0,
                        ..Default::default()
                    },
                    restaurant_name: None,
                })
            })
            .collect();
        let results = vec![IntentResult::ok(Intent::new(Target::Menu, Filters::new(), 50), records)];
        let text = render_fallback(&results);
        assert_eq!(text.lines().count(), 1 + FALLBACK_RECORDS);
    }

    #[test]
    fn test_fallback_no_results() {
        assert_eq!(render_fallback(&[]), NO_RESULTS_REPLY);
    }

    // ---- Composer ----

    #[tokio::test]
    async fn test_compose_cleans_model_output() {
        let completion = ScriptedCompletion::new(vec![Ok("**Zinger Burger** is $4.50 at KFC.".into())]);
        let reply = composer(completion.clone())
            .compose("cheap food", &QueryPlan::empty(), &item_result(), &[])
            .await;
        assert_eq!(reply, "Zinger Burger is $4.50 at KFC.");
        let request = &completion.requests()[0];
        assert!(request.prompt.contains("Zinger Burger"));
        assert!(request.system.contains("No markdown"));
    }

    #[tokio::test]
    async fn test_compose_falls_back_on_error() {
        let completion = ScriptedCompletion::new(vec![Err(CompletionError::Http {
            status: 401,
            message: "bad key".into(),
            retryable: false,
            retry_after: None,
        })]);
        let reply = composer(completion)
            .compose("cheap food", &QueryPlan::empty(), &item_result(), &[])
            .await;
        assert!(reply.contains("- Zinger Burger, $4.50"));
        assert!(!reply.contains("401"));
    }

    #[tokio::test]
    async fn test_compose_falls_back_on_blank_output() {
        let completion = ScriptedCompletion::new(vec![Ok("```\n```".into())]);
        let reply = composer(completion)
            .compose("cheap food", &QueryPlan::empty(), &item_result(), &[])
            .await;
        assert!(reply.starts_with("Here's what I found"));
    }

    #[tokio::test]
    async fn test_compose_offline_skips_model() {
        let reply = composer(Arc::new(OfflineCompletion))
            .compose("cheap food", &QueryPlan::empty(), &item_result(), &[])
            .await;
        assert!(reply.contains("Zinger Burger"));
    }

    #[tokio::test]
    async fn test_compose_sends_recent_history() {
        let completion = ScriptedCompletion::new(vec![Ok("Sure.".into())]);
        let history: Vec<ChatMessage> = (0..6)
            .map(|n| {
                let role = if n % 2 == 0 { Role::User } else { Role::Assistant };
                message(role, &format!("turn {}", n))
            })
            .collect();
        composer(completion.clone())
            .compose("and drinks?", &QueryPlan::empty(), &item_result(), &history)
            .await;
        let turns = &completion.requests()[0].prior_turns;
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].content, "turn 2");
        assert_eq!(turns[3].role, Role::Assistant);
    }
}
