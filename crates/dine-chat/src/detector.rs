//! Intent detection.
//!
//! Two stages. The keyword stage is an ordered list of deterministic rules;
//! the first rule that matches produces the (single) intent and no model call
//! is made. Only when nothing matches does the model stage ask the completion
//! service for a JSON query plan. Detection never fails: the worst case is an
//! empty plan.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::completion::{CompletionRequest, CompletionService, RetryPolicy};
use crate::filter::{filters_from_json, filters_to_json, FilterValue, Filters};
use crate::normalizer::{clock_from_parts, AMBIENCE_MATCHERS};
use crate::types::{Intent, QueryPlan, Target};

/// Limit used when the model omits one or sends something non-numeric.
pub const DEFAULT_MODEL_LIMIT: usize = 20;

// =============================================================================
// Compiled patterns (compiled once, reused across calls)
// =============================================================================

fn mk(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Invalid keyword regex")
}

fn mk_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| mk(p)).collect()
}

struct OpenPatterns {
    trigger: Regex,
    names: Vec<Regex>,
    at_time: Regex,
}

static OPEN: LazyLock<OpenPatterns> = LazyLock::new(|| OpenPatterns {
    trigger: mk(r"(?i)\b(?:open\s+(?:right\s+)?now|currently\s+open|still\s+open|is\s+open|are\s+open)\b"),
    names: mk_all(&[
        r"(?i)\b(?:is|are)\s+(.+?)\s+(?:still\s+)?open\b",
        r"(?i)^(.+?)\s+(?:open\s+(?:right\s+)?now|currently\s+open|still\s+open)\b",
    ]),
    at_time: mk(r"(?i)\bopen\s+(?:at|around|by)\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b"),
});

struct MenuPatterns {
    trigger: Regex,
    cuisine_phrases: Regex,
    names: Vec<Regex>,
    budget: Regex,
}

static MENU: LazyLock<MenuPatterns> = LazyLock::new(|| MenuPatterns {
    trigger: mk(r"(?i)\b(?:menus?|dish(?:es)?|food|drinks?|specials|what\s+do\s+they\s+(?:serve|have))\b"),
    cuisine_phrases: mk(r"(?i)\b(?:fast|street)\s+food\b"),
    names: mk_all(&[
        r"(?i)(.+?)'s\s+menu",
        r"(?i)(?:show|get|what's|what\s+is|see)\s+(?:me\s+)?(?:the\s+)?(.+?)\s*(?:'s\s+)?(?:menu|dishes|food)",
        r"(?i)menu\s+(?:at|of|for|from)\s+(?:the\s+)?(.+)",
        r"(?i)what\s+(?:does|do)\s+(.+?)\s+(?:have|serve|offer)",
        r"(?i)(.+?)\s+menu\b",
    ]),
    budget: mk(
        r"(?i)\b(?:under|below|less\s+than|cheaper\s+than|up\s+to|max(?:imum)?)\s*\$?\s*(\d+(?:\.\d+)?)\s*(?:\$|dollars?|usd|bucks)?",
    ),
});

struct HoursPatterns {
    trigger: Regex,
    names: Vec<Regex>,
}

static HOURS: LazyLock<HoursPatterns> = LazyLock::new(|| HoursPatterns {
    trigger: mk(r"(?i)(?:\bopening\s+hours?\b|\bhours\b|\bopen\s+at\b|\bclose\s+at\b|\bclosing\s+time\b|\bwhat\s+time\b|\bwhen\s+does\b)"),
    names: mk_all(&[
        r"(?i)(.+?)'s\s+(?:opening\s+)?hours",
        r"(?i)(?:opening\s+hours?|hours?)\s+(?:of|for|at)\s+(?:the\s+)?(.+)",
        r"(?i)(?:what\s+are|show\s+me|tell\s+me|give\s+me)\s+(?:the\s+)?(.+?)\s*(?:'s\s+)?(?:opening\s+hours?|hours?)",
        r"(?i)(?:what\s+time\s+does|when\s+does|when\s+is)\s+(?:the\s+)?(.+?)\s+(?:open|close)",
        r"(?i)(.+?)\s+(?:opening\s+hours?|hours)",
    ]),
});

static RECOMMEND: LazyLock<Regex> =
    LazyLock::new(|| mk(r"(?i)\b(?:recommend\w*|suggest\w*|best\s+restaurants?|near\s+me)\b"));

static PROMOTION: LazyLock<Regex> = LazyLock::new(|| {
    mk(r"(?i)\b(?:promotions?|promos?|deals?|discounts?|offers?|sales?|happy\s+hour)\b")
});

/// "What does X offer" asks about a menu, not a deal.
static OFFER_QUESTION: LazyLock<Regex> =
    LazyLock::new(|| mk(r"(?i)\bwhat\s+(?:does|do)\s+.+?\s+offer\b"));

static MENU_QUESTION: LazyLock<Regex> =
    LazyLock::new(|| mk(r"(?i)\bwhat\s+(?:does|do)\s+.+?\s+(?:serve|have|offer)\b"));

static PRICE_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    mk(r"(?i)\b(?:prices?|pricing|priced|cheap\w*|expensive|costs?|budget|luxury|affordable|mid-range|premium)\b")
});

/// Price words to tier, checked in order.
static PRICE_TIERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (mk(r"(?i)\b(?:cheap\w*|budget|affordable)\b"), "BUDGET"),
        (mk(r"(?i)\b(?:luxury|expensive|high-end)\b"), "LUXURY"),
        (mk(r"(?i)\bpremium\b"), "PREMIUM"),
        (mk(r"(?i)\b(?:mid-range|moderate\w*)\b"), "MID_RANGE"),
    ]
});

/// Cuisine and venue words to a restaurant filter, checked in order.
static CUISINES: LazyLock<Vec<(Regex, &'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        (mk(r"(?i)\bfast\s+food\b"), "type", "fast_food"),
        (mk(r"(?i)\b(?:coffee|caf[eé]s?)\b"), "type", "cafe"),
        (mk(r"(?i)\bfine\s+dining\b"), "type", "fine_dining"),
        (mk(r"(?i)\bstreet\s+food\b"), "type", "street_food"),
        (mk(r"(?i)\bchinese\b"), "cuisine", "Chinese"),
        (mk(r"(?i)\bjapanese\b"), "cuisine", "Japanese"),
        (mk(r"(?i)\bitalian\b"), "cuisine", "Italian"),
        (mk(r"(?i)\bwestern\b"), "cuisine", "Western"),
        (mk(r"(?i)\b(?:cambodian|khmer)\b"), "cuisine", "Cambodian"),
        (mk(r"(?i)\bseafood\b"), "cuisine", "Seafood"),
        (mk(r"(?i)\bpizzas?\b"), "category", "Pizza"),
        (mk(r"(?i)\bburgers?\b"), "category", "Burger"),
        (mk(r"(?i)\bhot\s*pot\b"), "category", "Hot Pot"),
        (mk(r"(?i)\bbuffets?\b"), "category", "Buffet"),
        (mk(r"(?i)\bsteak\w*\b"), "cuisine", "Steakhouse"),
    ]
});

static PRIVATE_ROOM: LazyLock<Regex> =
    LazyLock::new(|| mk(r"(?i)\bprivate\s+(?:rooms?|dining)\b"));

// =============================================================================
// Restaurant name extraction
// =============================================================================

static POSSESSIVE: LazyLock<Regex> = LazyLock::new(|| mk(r"(?i)['’]s\b"));
static TRAILING_DOMAIN_WORD: LazyLock<Regex> = LazyLock::new(|| {
    mk(r"(?i)\s+(?:opening\s+hours?|menu|food|dishes|drinks|restaurant|place|hours|today|tonight|now)$")
});

/// Words that are never a restaurant name on their own and that are
/// stripped when they lead a capture ("what are KFC" is KFC).
const FILLER_WORDS: &[&str] = &[
    "what", "whats", "which", "when", "where", "how", "is", "are", "does", "do", "show", "tell",
    "give", "get", "see", "find", "me", "the", "a", "an", "on", "at", "for", "of", "about",
    "please", "can", "could", "you", "your", "our", "my", "i", "their", "it", "they", "any", "some", "there",
    "anything", "anywhere", "something", "restaurants", "places", "everything",
];

fn is_filler(word: &str) -> bool {
    FILLER_WORDS.contains(&word.to_lowercase().as_str())
}

/// Clean a captured restaurant name. Returns `None` when what is left is a
/// stopword, filler only, or a single character.
pub fn clean_restaurant_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches(|c: char| "?.!,".contains(c) || c.is_whitespace());
    let without_possessive = POSSESSIVE.replace_all(trimmed, "");

    let words: Vec<&str> = without_possessive.split_whitespace().collect();
    let first_real = words.iter().position(|w| !is_filler(w))?;
    let mut name = words[first_real..].join(" ");

    loop {
        let stripped = TRAILING_DOMAIN_WORD.replace(&name, "").into_owned();
        if stripped == name {
            break;
        }
        name = stripped;
    }

    let name = name.trim().to_string();
    if name.chars().count() <= 1 || name.split_whitespace().all(is_filler) {
        return None;
    }
    Some(name)
}

fn first_name_match(patterns: &[Regex], message: &str) -> Option<String> {
    patterns
        .iter()
        .filter_map(|re| re.captures(message))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .find_map(|raw| clean_restaurant_name(&raw))
}

fn with_name(name: Option<String>) -> Filters {
    let mut filters = Filters::new();
    if let Some(name) = name {
        filters.insert("restaurantName".to_string(), FilterValue::text(name));
    }
    filters
}

// =============================================================================
// Keyword rules
// =============================================================================

type KeywordRule = fn(&str) -> Option<Intent>;

/// Keyword rules in priority order; the first match wins.
pub const KEYWORD_RULES: &[(&str, KeywordRule)] = &[
    ("is_open_now", rule_is_open_now),
    ("open_now", rule_open_now),
    ("open_at", rule_open_at),
    ("recommendation", rule_recommendation),
    ("promotion", rule_promotion),
    ("menu", rule_menu),
    ("opening_hours", rule_opening_hours),
    ("price", rule_price),
    ("cuisine", rule_cuisine),
    ("ambience", rule_ambience),
];

fn rule_is_open_now(message: &str) -> Option<Intent> {
    if !OPEN.trigger.is_match(message) {
        return None;
    }
    let name = first_name_match(&OPEN.names, message)?;
    Some(Intent::new(Target::IsOpenNow, with_name(Some(name)), 1))
}

fn rule_open_now(message: &str) -> Option<Intent> {
    OPEN.trigger
        .is_match(message)
        .then(|| Intent::new(Target::OpenNow, Filters::new(), 10))
}

fn rule_open_at(message: &str) -> Option<Intent> {
    let caps = OPEN.at_time.captures(message)?;
    let hour = caps.get(1)?.as_str().parse().ok()?;
    let minute = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let time = clock_from_parts(hour, minute, caps.get(3).map(|m| m.as_str()))?;
    let mut filters = Filters::new();
    filters.insert("time".to_string(), FilterValue::text(time));
    Some(Intent::new(Target::OpenAt, filters, 10))
}

fn rule_recommendation(message: &str) -> Option<Intent> {
    RECOMMEND
        .is_match(message)
        .then(|| Intent::new(Target::Restaurant, Filters::new(), 5))
}

fn rule_promotion(message: &str) -> Option<Intent> {
    if !PROMOTION.is_match(message) || OFFER_QUESTION.is_match(message) {
        return None;
    }
    Some(Intent::new(Target::Promotion, Filters::new(), 10))
}

fn rule_menu(message: &str) -> Option<Intent> {
    let without_cuisines = MENU.cuisine_phrases.replace_all(message, " ");
    if !MENU.trigger.is_match(&without_cuisines) && !MENU_QUESTION.is_match(message) {
        return None;
    }

    let without_budget = MENU.budget.replace_all(message, " ");
    let mut filters = with_name(first_name_match(&MENU.names, &without_budget));
    if let Some(max) = MENU
        .budget
        .captures(message)
        .and_then(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
    {
        filters.insert("price".to_string(), FilterValue::max(max));
    }
    Some(Intent::new(Target::Menu, filters, 20))
}

fn rule_opening_hours(message: &str) -> Option<Intent> {
    if !HOURS.trigger.is_match(message) {
        return None;
    }
    let filters = with_name(first_name_match(&HOURS.names, message));
    Some(Intent::new(Target::OpeningHours, filters, 5))
}

fn rule_price(message: &str) -> Option<Intent> {
    if !PRICE_TRIGGER.is_match(message) {
        return None;
    }
    match PRICE_TIERS.iter().find(|(re, _)| re.is_match(message)) {
        Some((_, tier)) => {
            let mut filters = Filters::new();
            filters.insert("priceTier".to_string(), FilterValue::text(*tier));
            Some(Intent::new(Target::Restaurant, filters, 10))
        }
        None => Some(Intent::new(Target::PriceTier, Filters::new(), 5)),
    }
}

fn rule_cuisine(message: &str) -> Option<Intent> {
    let (_, key, value) = CUISINES.iter().find(|(re, _, _)| re.is_match(message))?;
    let mut filters = Filters::new();
    filters.insert(key.to_string(), FilterValue::text(*value));
    Some(Intent::new(Target::Restaurant, filters, 10))
}

fn rule_ambience(message: &str) -> Option<Intent> {
    let wants_private_room = PRIVATE_ROOM.is_match(message);
    // "private room" is a facility, not an intimate atmosphere.
    let scan = PRIVATE_ROOM.replace_all(message, " ");

    let mut tags: Vec<&'static str> = Vec::new();
    for (re, tag) in AMBIENCE_MATCHERS.iter() {
        if !tags.contains(tag) && re.is_match(&scan) {
            tags.push(*tag);
        }
    }

    if tags.is_empty() && !wants_private_room {
        return None;
    }

    let mut filters = Filters::new();
    match tags.len() {
        0 => {}
        1 => {
            filters.insert("ambience".to_string(), FilterValue::text(tags[0]));
        }
        _ => {
            filters.insert("ambience".to_string(), FilterValue::set(tags));
        }
    }
    if wants_private_room {
        filters.insert("hasPrivateRooms".to_string(), FilterValue::bool(true));
    }
    Some(Intent::new(Target::Restaurant, filters, 10))
}

/// Run the keyword rules; returns the matching rule's name and its intent.
pub fn keyword_stage(message: &str) -> Option<(&'static str, Intent)> {
    KEYWORD_RULES
        .iter()
        .find_map(|(name, rule)| rule(message).map(|intent| (*name, intent)))
}

// =============================================================================
// Model stage
// =============================================================================

const MODEL_SYSTEM_PROMPT: &str = "You output JSON only.";

fn model_prompt(message: &str, session_filters: Option<&Filters>) -> String {
    let targets: Vec<&str> = Target::ALL.iter().map(Target::as_str).collect();
    let context = match session_filters {
        Some(f) if !f.is_empty() => format!(
            "\nEarlier in this conversation the user was interested in: {}\nUse it only if the new message refers back to it.\n",
            filters_to_json(f)
        ),
        _ => String::new(),
    };
    format!(
        r#"You are a restaurant assistant.
Map the user's message to JSON intents.

Return ONLY valid JSON in this EXACT schema:

{{
  "intents": [
    {{
      "target": "{}",
      "filters": {{}},
      "limit": 20
    }}
  ]
}}

Useful filter keys: restaurantName, name, cuisine, category, type, ambience,
priceTier (BUDGET, MID_RANGE, PREMIUM, LUXURY), hasPrivateRooms, maxPrice,
dayOfWeek, time (HH:MM), title, query.
Include "restaurantName" in filters if a restaurant is mentioned.
{}
User message:
"{}"
"#,
        targets.join("|"),
        context,
        message
    )
}

/// The first balanced `{...}` span in `text`, ignoring braces inside JSON
/// strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn coerce_limit(value: Option<&Value>) -> usize {
    match value.and_then(Value::as_f64) {
        Some(n) if n.is_finite() && n >= 0.0 => n as usize,
        _ => DEFAULT_MODEL_LIMIT,
    }
}

/// Parse a model reply into a plan. Any structural problem yields an empty
/// plan; intents with unknown targets are dropped.
pub fn parse_model_plan(reply: &str) -> QueryPlan {
    let Some(json) = extract_json_object(reply) else {
        debug!("Model reply contained no JSON object");
        return QueryPlan::empty();
    };
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Model reply was not valid JSON");
            return QueryPlan::empty();
        }
    };
    let Some(items) = value.get("intents").and_then(Value::as_array) else {
        return QueryPlan::empty();
    };

    let intents = items
        .iter()
        .filter_map(|item| {
            let raw_target = item.get("target").and_then(Value::as_str)?;
            let Some(target) = Target::parse(raw_target) else {
                debug!(intent_target = raw_target, "Dropping intent with unknown target");
                return None;
            };
            let filters = item.get("filters").map(filters_from_json).unwrap_or_default();
            Some(Intent::new(target, filters, coerce_limit(item.get("limit"))))
        })
        .collect();
    QueryPlan { intents }
}

/// Classifies messages into query plans.
pub struct IntentDetector {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
}

impl IntentDetector {
    pub fn new(completion: Arc<dyn CompletionService>, retry: RetryPolicy) -> Self {
        Self { completion, retry }
    }

    /// Detect the intents of `message`. Session filters are offered to the
    /// model as context; the keyword stage ignores them.
    pub async fn detect(&self, message: &str, session_filters: Option<&Filters>) -> QueryPlan {
        if let Some((rule, intent)) = keyword_stage(message) {
            debug!(rule, intent_target = intent.target.as_str(), "Keyword rule matched");
            return QueryPlan::single(intent);
        }

        if !self.completion.is_configured() {
            debug!("No keyword match and no completion service; empty plan");
            return QueryPlan::empty();
        }

        let request = CompletionRequest {
            system: MODEL_SYSTEM_PROMPT.to_string(),
            prior_turns: Vec::new(),
            prompt: model_prompt(message, session_filters),
        };
        match self
            .retry
            .run("intent_detection", || self.completion.complete(&request))
            .await
        {
            Ok(reply) => {
                let plan = parse_model_plan(&reply);
                debug!(intents = plan.intents.len(), "Model stage produced plan");
                plan
            }
            Err(e) => {
                warn!(error = %e, "Model intent detection failed");
                QueryPlan::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletion;
    use crate::completion::CompletionError;

    fn detect_kw(message: &str) -> Intent {
        keyword_stage(message)
            .unwrap_or_else(|| panic!("no keyword match for {:?}", message))
            .1
    }

    fn name_of(intent: &Intent) -> Option<String> {
        intent
            .filters
            .get("restaurantName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    // ---- Open now / open at ----

    #[test]
    fn test_specific_open_now() {
        let intent = detect_kw("Is KFC open now?");
        assert_eq!(intent.target, Target::IsOpenNow);
        assert_eq!(name_of(&intent).as_deref(), Some("KFC"));
        assert_eq!(intent.limit, 1);

        let intent = detect_kw("Is the Brown Coffee still open?");
        assert_eq!(intent.target, Target::IsOpenNow);
        assert_eq!(name_of(&intent).as_deref(), Some("Brown Coffee"));
    }

    #[test]
    fn test_generic_open_now() {
        for msg in ["What's open now?", "Which restaurants are open right now", "anything currently open?"] {
            let intent = detect_kw(msg);
            assert_eq!(intent.target, Target::OpenNow, "{}", msg);
            assert!(intent.filters.is_empty());
            assert_eq!(intent.limit, 10);
        }
    }

    #[test]
    fn test_open_at_times() {
        let cases = [
            ("Anything open at 9pm?", "21:00"),
            ("anything open around 7:30 am", "07:30"),
            ("places open by 12am", "00:00"),
            ("open at 12pm", "12:00"),
            ("open at 18", "18:00"),
        ];
        for (msg, expected) in cases {
            let intent = detect_kw(msg);
            assert_eq!(intent.target, Target::OpenAt, "{}", msg);
            assert_eq!(intent.filters.get("time"), Some(&FilterValue::text(expected)));
        }
    }

    // ---- Recommendation / promotion ----

    #[test]
    fn test_recommendation() {
        let intent = detect_kw("Can you recommend somewhere near me?");
        assert_eq!(intent.target, Target::Restaurant);
        assert_eq!(intent.limit, 5);
    }

    #[test]
    fn test_promotion() {
        let intent = detect_kw("Any deals this weekend?");
        assert_eq!(intent.target, Target::Promotion);
        assert_eq!(intent.limit, 10);
        assert!(keyword_stage("a salad").is_none());
    }

    // ---- Menu ----

    #[test]
    fn test_menu_name_extraction() {
        let cases = [
            ("Show me KFC's menu", "KFC"),
            ("What's on the menu at Pho 24?", "Pho 24"),
            ("menu for the Lucky Burger", "Lucky Burger"),
            ("What does Brown Coffee serve?", "Brown Coffee"),
            ("Malis menu please", "Malis"),
        ];
        for (msg, expected) in cases {
            let intent = detect_kw(msg);
            assert_eq!(intent.target, Target::Menu, "{}", msg);
            assert_eq!(name_of(&intent).as_deref(), Some(expected), "{}", msg);
            assert_eq!(intent.limit, 20);
        }
    }

    #[test]
    fn test_menu_offer_question_is_not_promotion() {
        let intent = detect_kw("What does Malis offer?");
        assert_eq!(intent.target, Target::Menu);
        assert_eq!(name_of(&intent).as_deref(), Some("Malis"));
    }

    #[test]
    fn test_menu_budget_ceiling() {
        let intent = detect_kw("food under $5");
        assert_eq!(intent.target, Target::Menu);
        assert_eq!(intent.filters.get("price"), Some(&FilterValue::max(5.0)));
        assert!(name_of(&intent).is_none());

        let intent = detect_kw("drinks less than 3.5 dollars");
        assert_eq!(intent.filters.get("price"), Some(&FilterValue::max(3.5)));
    }

    #[test]
    fn test_menu_budget_is_not_part_of_name() {
        let intent = detect_kw("Show me the menu at Luna Rooftop under $5");
        assert_eq!(intent.target, Target::Menu);
        assert_eq!(name_of(&intent).as_deref(), Some("Luna Rooftop"));
        assert_eq!(intent.filters.get("price"), Some(&FilterValue::max(5.0)));
    }

    #[test]
    fn test_menu_without_name() {
        let intent = detect_kw("show me the menu");
        assert_eq!(intent.target, Target::Menu);
        assert!(intent.filters.is_empty());
    }

    // ---- Opening hours ----

    #[test]
    fn test_opening_hours_name_extraction() {
        let cases = [
            ("What are KFC's opening hours?", "KFC"),
            ("opening hours of the Lucky Burger", "Lucky Burger"),
            ("What time does Starbucks close?", "Starbucks"),
            ("Malis hours", "Malis"),
        ];
        for (msg, expected) in cases {
            let intent = detect_kw(msg);
            assert_eq!(intent.target, Target::OpeningHours, "{}", msg);
            assert_eq!(name_of(&intent).as_deref(), Some(expected), "{}", msg);
            assert_eq!(intent.limit, 5);
        }
    }

    #[test]
    fn test_opening_hours_without_name() {
        let intent = detect_kw("what are your hours?");
        assert_eq!(intent.target, Target::OpeningHours);
        assert!(name_of(&intent).is_none());
    }

    // ---- Price / cuisine / ambience ----

    #[test]
    fn test_price_tiers() {
        let cases = [
            ("somewhere cheap", "BUDGET"),
            ("affordable places", "BUDGET"),
            ("an expensive night out", "LUXURY"),
            ("premium restaurants", "PREMIUM"),
            ("mid-range prices", "MID_RANGE"),
        ];
        for (msg, tier) in cases {
            let intent = detect_kw(msg);
            assert_eq!(intent.target, Target::Restaurant, "{}", msg);
            assert_eq!(intent.filters.get("priceTier"), Some(&FilterValue::text(tier)));
        }

        let intent = detect_kw("how much does it cost?");
        assert_eq!(intent.target, Target::PriceTier);
        assert_eq!(intent.limit, 5);
    }

    #[test]
    fn test_cuisine_table() {
        let cases = [
            ("any fast food places", "type", "fast_food"),
            ("I want coffee", "type", "cafe"),
            ("italian please", "cuisine", "Italian"),
            ("good burgers", "category", "Burger"),
            ("hot pot tonight", "category", "Hot Pot"),
            ("a steakhouse", "cuisine", "Steakhouse"),
        ];
        for (msg, key, value) in cases {
            let intent = detect_kw(msg);
            assert_eq!(intent.target, Target::Restaurant, "{}", msg);
            assert_eq!(intent.filters.get(key), Some(&FilterValue::text(value)), "{}", msg);
        }
    }

    #[test]
    fn test_ambience_single_and_multiple() {
        let intent = detect_kw("somewhere for a date");
        assert_eq!(intent.filters.get("ambience"), Some(&FilterValue::text("romantic")));

        let intent = detect_kw("a quiet place with wifi");
        assert_eq!(
            intent.filters.get("ambience"),
            Some(&FilterValue::set(["quiet", "work-friendly"]))
        );
    }

    #[test]
    fn test_private_room() {
        let intent = detect_kw("need a private room for 10");
        assert_eq!(intent.filters.get("hasPrivateRooms"), Some(&FilterValue::bool(true)));
        assert!(intent.filters.get("ambience").is_none());
    }

    #[test]
    fn test_word_boundaries() {
        // "update" contains "date", "breakfast" contains "fast".
        assert!(keyword_stage("any update on breakfast?").is_none());
    }

    #[test]
    fn test_priority_order() {
        // Menu beats price; open-now phrasing beats a clock time.
        assert_eq!(detect_kw("cheap menu items").target, Target::Menu);
        assert_eq!(detect_kw("What's open now near me?").target, Target::OpenNow);
        assert_eq!(detect_kw("Is KFC open at 9pm?").target, Target::OpenAt);

        let intent = detect_kw("Is KFC still open at 10pm?");
        assert_eq!(intent.target, Target::IsOpenNow);
        assert_eq!(intent.filters.get("restaurantName"), Some(&FilterValue::text("KFC")));
        assert!(intent.filters.get("time").is_none());

        assert_eq!(detect_kw("Who is open at 9pm?").target, Target::OpenNow);
    }

    #[test]
    fn test_unmatched() {
        assert!(keyword_stage("tell me a joke").is_none());
    }

    // ---- Name cleanup ----

    #[test]
    fn test_clean_restaurant_name() {
        assert_eq!(clean_restaurant_name("KFC's").as_deref(), Some("KFC"));
        assert_eq!(clean_restaurant_name("the Pizza Place").as_deref(), Some("Pizza"));
        assert_eq!(clean_restaurant_name("What are KFC").as_deref(), Some("KFC"));
        assert_eq!(clean_restaurant_name("Malis restaurant?").as_deref(), Some("Malis"));
        assert_eq!(clean_restaurant_name("what"), None);
        assert_eq!(clean_restaurant_name("the"), None);
        assert_eq!(clean_restaurant_name("X"), None);
        assert_eq!(clean_restaurant_name("on the"), None);
    }

    // ---- Model stage ----

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object(r#"Sure! {"intents": [{"filters": {"a": "}"}}]} trailing {}"#),
            Some(r#"{"intents": [{"filters": {"a": "}"}}]}"#)
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unbalanced"), None);
    }

    #[test]
    fn test_parse_model_plan_coercions() {
        let plan = parse_model_plan(
            r#"```json
{"intents": [
  {"target": "menu", "filters": {"restaurantName": "KFC"}, "limit": 7},
  {"target": "opening_hours", "filters": "KFC", "limit": "five"},
  {"target": "reservations", "filters": {}},
  {"target": "restaurant", "filters": {}, "limit": 900}
]}
```"#,
        );
        assert_eq!(plan.intents.len(), 3);
        assert_eq!(plan.intents[0].limit, 7);
        assert!(plan.intents[1].filters.is_empty());
        assert_eq!(plan.intents[1].limit, DEFAULT_MODEL_LIMIT);
        assert_eq!(plan.intents[2].limit, crate::types::MAX_INTENT_LIMIT);
    }

    #[test]
    fn test_parse_model_plan_failures_are_empty() {
        assert!(parse_model_plan("I cannot help").is_empty());
        assert!(parse_model_plan(r#"{"intents": "nope"}"#).is_empty());
        assert!(parse_model_plan(r#"{"intents": [oops]}"#).is_empty());
    }

    #[tokio::test]
    async fn test_keyword_match_skips_model() {
        let completion = ScriptedCompletion::new(vec![Ok(r#"{"intents": []}"#.into())]);
        let detector = IntentDetector::new(completion.clone(), RetryPolicy::no_retry());
        let plan = detector.detect("What are KFC's opening hours?", None).await;
        assert_eq!(plan.intents.len(), 1);
        assert_eq!(plan.intents[0].target, Target::OpeningHours);
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_stage_used_when_no_keyword() {
        let completion = ScriptedCompletion::new(vec![Ok(
            r#"Here you go: {"intents": [{"target": "restaurant", "filters": {"cuisine": "Thai"}, "limit": 3}]}"#.into(),
        )]);
        let detector = IntentDetector::new(completion.clone(), RetryPolicy::no_retry());

        let mut session = Filters::new();
        session.insert("ambience".into(), FilterValue::set(["quiet"]));
        let plan = detector.detect("somewhere with pad thai", Some(&session)).await;

        assert_eq!(plan.intents.len(), 1);
        assert_eq!(plan.intents[0].filters.get("cuisine"), Some(&FilterValue::text("Thai")));
        assert_eq!(completion.calls(), 1);
        let prompt = &completion.requests()[0].prompt;
        assert!(prompt.contains("somewhere with pad thai"));
        assert!(prompt.contains("quiet"));
    }

    #[tokio::test]
    async fn test_model_failure_gives_empty_plan() {
        let completion = ScriptedCompletion::new(vec![Err(CompletionError::EmptyOutput)]);
        let detector = IntentDetector::new(completion, RetryPolicy::no_retry());
        assert!(detector.detect("tell me a joke", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_completion_skips_model() {
        let detector = IntentDetector::new(
            Arc::new(crate::completion::OfflineCompletion),
            RetryPolicy::default(),
        );
        assert!(detector.detect("tell me a joke", None).await.is_empty());
    }
}
