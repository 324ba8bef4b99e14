//! Filter normalization.
//!
//! Raw filters from the keyword rules or the model are canonicalized into
//! query-ready filters for one target collection: aliases resolved, ambience
//! synonyms folded onto canonical tags, values case-folded, and keys the
//! target does not understand removed. Normalizing twice is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use dine_core::{DayOfWeek, PriceTier};

use crate::filter::{FilterValue, Filters, Scalar};
use crate::types::Target;

// =============================================================================
// Ambience vocabulary
// =============================================================================

/// Canonical ambience tags and the words that mean them.
pub const AMBIENCE_SYNONYMS: &[(&str, &[&str])] = &[
    ("romantic", &["date", "anniversary", "couples", "valentine"]),
    ("quiet", &["peaceful", "calm", "relaxing", "tranquil"]),
    ("family-friendly", &["family", "kids", "children"]),
    ("casual", &["relaxed", "informal", "chill", "laid-back"]),
    ("lively", &["vibrant", "energetic", "bustling", "fun"]),
    ("festive", &["party", "celebration", "birthday"]),
    ("elegant", &["fancy", "classy", "sophisticated"]),
    ("upscale", &["luxurious", "high-end", "posh"]),
    ("cozy", &["warm", "comfortable"]),
    ("intimate", &["private"]),
    ("work-friendly", &["work", "laptop", "study", "wifi", "remote work"]),
    ("business-friendly", &["business", "meeting", "corporate"]),
    ("outdoor", &["terrace", "garden", "patio", "rooftop"]),
    ("scenic", &["view", "beautiful view"]),
    ("modern", &["trendy", "contemporary", "hipster"]),
    ("traditional", &["classic"]),
    ("local-vibe", &["authentic", "local"]),
    (
        "instagram-worthy",
        &["instagram", "instagrammable", "aesthetic", "photogenic", "photo"],
    ),
    ("interactive", &["diy", "cook yourself", "bbq"]),
    ("quick-service", &["quick", "fast", "grab and go", "takeaway"]),
];

/// Word-boundary matchers for every ambience term, canonical names first
/// within each group.
pub(crate) static AMBIENCE_MATCHERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    AMBIENCE_SYNONYMS
        .iter()
        .flat_map(|(canonical, synonyms)| {
            std::iter::once(*canonical)
                .chain(synonyms.iter().copied())
                .map(move |term| {
                    let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
                    (
                        Regex::new(&pattern).expect("Invalid ambience regex"),
                        *canonical,
                    )
                })
        })
        .collect()
});

/// Exact lookup of a canonical tag or synonym.
pub fn ambience_for(term: &str) -> Option<&'static str> {
    let term = term.trim().to_lowercase();
    AMBIENCE_SYNONYMS.iter().find_map(|(canonical, synonyms)| {
        (*canonical == term || synonyms.contains(&term.as_str())).then_some(*canonical)
    })
}

/// Canonical tag for a free-form ambience term. Exact terms win, then the
/// first known word inside a phrase ("romantic dinner" is romantic); unknown
/// terms pass through lowercased.
pub fn canonical_ambience(term: &str) -> String {
    if let Some(tag) = ambience_for(term) {
        return tag.to_string();
    }
    AMBIENCE_MATCHERS
        .iter()
        .find(|(re, _)| re.is_match(term))
        .map(|(_, tag)| tag.to_string())
        .unwrap_or_else(|| term.trim().to_lowercase())
}

// =============================================================================
// Clock times
// =============================================================================

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2})(?:[:.](\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?\s*$")
        .expect("Invalid clock regex")
});

/// Convert hour, minute and an optional am/pm marker into `HH:MM`.
/// `12am` is `00:00` and `12pm` is `12:00`. Out-of-range parts yield `None`.
pub fn clock_from_parts(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<String> {
    if minute > 59 {
        return None;
    }
    let hour = match meridiem.map(|m| m.to_lowercase().replace('.', "")) {
        Some(m) if (1..=12).contains(&hour) => match m.as_str() {
            "am" if hour == 12 => 0,
            "am" => hour,
            "pm" if hour == 12 => 12,
            "pm" => hour + 12,
            _ => return None,
        },
        Some(_) => return None,
        None if hour <= 23 => hour,
        None => return None,
    };
    Some(format!("{:02}:{:02}", hour, minute))
}

/// Parse `19:00`, `7pm`, `7:30 pm`, `noon` or `midnight` into `HH:MM`.
pub fn parse_clock_time(input: &str) -> Option<String> {
    match input.trim().to_lowercase().as_str() {
        "noon" | "midday" => return Some("12:00".to_string()),
        "midnight" => return Some("00:00".to_string()),
        _ => {}
    }
    let caps = CLOCK_TIME.captures(input)?;
    let hour = caps.get(1)?.as_str().parse().ok()?;
    let minute = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    clock_from_parts(hour, minute, caps.get(3).map(|m| m.as_str()))
}

// =============================================================================
// Normalization
// =============================================================================

const RESTAURANT_KEYS: &[&str] = &[
    "name",
    "type",
    "category",
    "cuisine",
    "ambience",
    "hasPrivateRooms",
    "priceTier",
    "status",
    "price",
    "textSearch",
];
const MENU_KEYS: &[&str] = &["restaurantName", "name", "price", "itemType", "isSignature"];
const PROMOTION_KEYS: &[&str] = &[
    "restaurantName",
    "title",
    "status",
    "discountPercent",
    "startDate",
    "endDate",
];
const OPENING_HOURS_KEYS: &[&str] = &["restaurantName", "dayOfWeek"];
const PRICE_TIER_KEYS: &[&str] = &["tier"];
const IS_OPEN_NOW_KEYS: &[&str] = &["restaurantName"];
const OPEN_NOW_KEYS: &[&str] = &[
    "name",
    "type",
    "category",
    "cuisine",
    "ambience",
    "hasPrivateRooms",
    "priceTier",
];
const OPEN_AT_KEYS: &[&str] = &[
    "time",
    "day",
    "name",
    "type",
    "category",
    "cuisine",
    "ambience",
    "hasPrivateRooms",
    "priceTier",
];

/// Keys a target's retrieval routine understands.
pub fn allowed_keys(target: Target) -> &'static [&'static str] {
    match target {
        Target::Restaurant => RESTAURANT_KEYS,
        Target::Menu => MENU_KEYS,
        Target::Promotion => PROMOTION_KEYS,
        Target::OpeningHours => OPENING_HOURS_KEYS,
        Target::PriceTier => PRICE_TIER_KEYS,
        Target::IsOpenNow => IS_OPEN_NOW_KEYS,
        Target::OpenNow => OPEN_NOW_KEYS,
        Target::OpenAt => OPEN_AT_KEYS,
    }
}

const TEXT_QUERY_KEYS: &[&str] = &["query", "q", "text", "keyword", "search", "textSearch"];
const AMBIENCE_KEYS: &[&str] = &["ambience", "environment", "atmosphere", "vibe", "mood"];

fn is_restaurant_scoped(target: Target) -> bool {
    matches!(target, Target::Restaurant | Target::OpenNow | Target::OpenAt)
}

/// Map a raw key onto its canonical name for `target`.
fn canonical_key(target: Target, key: &str) -> &str {
    let restaurant_scoped = is_restaurant_scoped(target);
    match key {
        "restaurant" | "restaurant_name" | "restaurantname" | "restaurantName" => {
            if restaurant_scoped {
                "name"
            } else {
                "restaurantName"
            }
        }
        "name" if matches!(target, Target::OpeningHours | Target::IsOpenNow) => "restaurantName",
        "maxPrice" | "max_price" | "priceMax" | "minPrice" | "min_price" | "priceMin" => "price",
        "price_tier" | "pricetier" | "tier" | "priceTier" => {
            if target == Target::PriceTier {
                "tier"
            } else {
                "priceTier"
            }
        }
        "day" | "dayOfWeek" | "day_of_week" => {
            if target == Target::OpenAt {
                "day"
            } else {
                "dayOfWeek"
            }
        }
        "discount" | "discount_percent" | "discountPercent" => "discountPercent",
        "private_rooms" | "privateRooms" | "hasPrivateRooms" => "hasPrivateRooms",
        "item_type" | "itemType" => "itemType",
        other => other,
    }
}

fn trimmed_text(value: &FilterValue) -> Option<FilterValue> {
    match value {
        FilterValue::Text(p) => Some(FilterValue::Text(p.clone())),
        other => {
            let s = other.as_str()?.trim();
            (!s.is_empty()).then(|| FilterValue::text(s))
        }
    }
}

fn tier_value(value: &FilterValue) -> Option<FilterValue> {
    let tiers: Vec<String> = value
        .strings()
        .iter()
        .filter_map(|s| PriceTier::parse(s))
        .map(|t| t.as_str().to_string())
        .collect();
    match tiers.len() {
        0 => None,
        1 => Some(FilterValue::text(tiers[0].clone())),
        _ => Some(FilterValue::set(tiers)),
    }
}

fn merge_price(existing: Option<&FilterValue>, key: &str, value: &FilterValue) -> Option<FilterValue> {
    let (mut min, mut max) = existing.and_then(FilterValue::bounds).unwrap_or((None, None));
    if let Some((lo, hi)) = value.bounds() {
        min = lo.or(min);
        max = hi.or(max);
    } else {
        let n = value.as_f64()?;
        if key.starts_with("min") || key.ends_with("Min") {
            min = Some(n);
        } else {
            max = Some(n);
        }
    }
    Some(FilterValue::Range { min, max })
}

fn push_ambience(acc: &mut Vec<String>, value: &FilterValue) {
    for term in value.strings() {
        let tag = canonical_ambience(&term);
        if !tag.is_empty() && !acc.contains(&tag) {
            acc.push(tag);
        }
    }
}

/// Canonicalize raw filters for `target`.
///
/// Never emits a key outside [`allowed_keys`]. A free-text query becomes a
/// `textSearch` filter only on restaurant lookups that carry no structured
/// filter.
pub fn normalize(target: Target, raw: &Filters) -> Filters {
    let allowed = allowed_keys(target);
    let mut out = Filters::new();
    let mut ambience: Vec<String> = Vec::new();
    let mut text_query: Option<String> = None;

    for (raw_key, value) in raw {
        if AMBIENCE_KEYS.contains(&raw_key.as_str()) {
            push_ambience(&mut ambience, value);
            continue;
        }
        if TEXT_QUERY_KEYS.contains(&raw_key.as_str()) {
            if let Some(s) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                text_query.get_or_insert_with(|| s.to_string());
            }
            continue;
        }

        let key = canonical_key(target, raw_key);
        if !allowed.contains(&key) {
            debug!(intent_target = target.as_str(), key = %raw_key, "Dropping unsupported filter");
            continue;
        }

        let normalized = match key {
            "price" => merge_price(out.get("price"), raw_key, value),
            "discountPercent" => match value {
                FilterValue::Range { .. } => Some(value.clone()),
                other => other.as_f64().map(|n| FilterValue::Range {
                    min: Some(n),
                    max: None,
                }),
            },
            "priceTier" | "tier" => tier_value(value),
            "hasPrivateRooms" | "isSignature" => value.as_bool().map(FilterValue::bool),
            "type" => value.as_str().map(|s| {
                FilterValue::text(s.trim().to_lowercase().replace([' ', '-'], "_"))
            }),
            "itemType" => value
                .as_str()
                .map(|s| FilterValue::text(s.trim().to_uppercase())),
            "status" if target == Target::Promotion => value
                .as_str()
                .map(|s| FilterValue::text(s.trim().to_lowercase())),
            "dayOfWeek" | "day" => value
                .as_str()
                .and_then(DayOfWeek::parse)
                .map(|d| FilterValue::text(d.as_str())),
            "time" => value.as_str().and_then(parse_clock_time).map(FilterValue::text),
            "cuisine" => {
                // Atmosphere words given as a cuisine are ambience requests.
                let terms = value.strings();
                if !terms.is_empty() && terms.iter().all(|t| ambience_for(t).is_some()) {
                    push_ambience(&mut ambience, value);
                    None
                } else {
                    trimmed_text(value)
                }
            }
            _ => match value {
                FilterValue::Scalar(Scalar::Text(_)) | FilterValue::Text(_) => trimmed_text(value),
                other => Some(other.clone()),
            },
        };

        match normalized {
            Some(v) => {
                out.insert(key.to_string(), v);
            }
            None => debug!(intent_target = target.as_str(), key = %raw_key, "Dropping malformed filter value"),
        }
    }

    if !ambience.is_empty() && allowed.contains(&"ambience") {
        out.insert("ambience".to_string(), FilterValue::set(ambience));
    }

    if let Some(q) = text_query {
        if out.is_empty() && allowed.contains(&"textSearch") {
            out.insert("textSearch".to_string(), FilterValue::text(q));
        }
    }

    out
}
