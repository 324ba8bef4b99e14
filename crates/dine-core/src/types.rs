//! Domain record types.
//!
//! Records are read-only reference data owned by the record store. They use
//! camelCase on the wire so fixture files and API payloads share one shape.

use std::fmt;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Restaurant price banding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceTier {
    Budget,
    MidRange,
    Premium,
    Luxury,
}

impl PriceTier {
    pub const ALL: [PriceTier; 4] = [
        PriceTier::Budget,
        PriceTier::MidRange,
        PriceTier::Premium,
        PriceTier::Luxury,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceTier::Budget => "BUDGET",
            PriceTier::MidRange => "MID_RANGE",
            PriceTier::Premium => "PREMIUM",
            PriceTier::Luxury => "LUXURY",
        }
    }

    /// Lenient parse: case-insensitive, accepts `mid-range`, `mid range`
    /// and `MID_RANGE` alike.
    pub fn parse(s: &str) -> Option<Self> {
        let canonical: String = s
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        PriceTier::ALL.into_iter().find(|t| t.as_str() == canonical)
    }
}

impl fmt::Display for PriceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of the week as stored on opening-hours records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Mon => "MON",
            DayOfWeek::Tue => "TUE",
            DayOfWeek::Wed => "WED",
            DayOfWeek::Thu => "THU",
            DayOfWeek::Fri => "FRI",
            DayOfWeek::Sat => "SAT",
            DayOfWeek::Sun => "SUN",
        }
    }

    /// Accepts `MON`, `mon`, `Monday`, `monday`.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        let prefix = lower.get(..3)?;
        match prefix {
            "mon" => Some(DayOfWeek::Mon),
            "tue" => Some(DayOfWeek::Tue),
            "wed" => Some(DayOfWeek::Wed),
            "thu" => Some(DayOfWeek::Thu),
            "fri" => Some(DayOfWeek::Fri),
            "sat" => Some(DayOfWeek::Sat),
            "sun" => Some(DayOfWeek::Sun),
            _ => None,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    #[default]
    Food,
    Drink,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionStatus {
    #[default]
    Active,
    Expired,
    Scheduled,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::Active => "active",
            PromotionStatus::Expired => "expired",
            PromotionStatus::Scheduled => "scheduled",
        }
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub cuisine: String,
    pub description: String,
    pub address: String,
    pub phone: String,
    pub ambience: Vec<String>,
    pub tags: Vec<String>,
    pub has_private_rooms: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_tier: Option<PriceTier>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Menu {
    pub id: String,
    pub restaurant_id: String,
    pub name: String,
    pub description: String,
    pub visible: bool,
}

impl Default for Menu {
    fn default() -> Self {
        Self {
            id: String::new(),
            restaurant_id: String::new(),
            name: String::new(),
            description: String::new(),
            visible: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MenuItem {
    pub id: String,
    pub restaurant_id: String,
    pub menu_id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub item_type: ItemType,
    pub is_signature: bool,
    pub availability: bool,
    pub tags: Vec<String>,
}

impl Default for MenuItem {
    fn default() -> Self {
        Self {
            id: String::new(),
            restaurant_id: String::new(),
            menu_id: String::new(),
            name: String::new(),
            description: String::new(),
            price: 0.0,
            item_type: ItemType::Food,
            is_signature: false,
            availability: true,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub id: String,
    pub restaurant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub discount_percent: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub conditions: String,
    #[serde(default)]
    pub status: PromotionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningHours {
    #[serde(default)]
    pub id: String,
    pub restaurant_id: String,
    pub day_of_week: DayOfWeek,
    /// `HH:MM`, absent when closed that day.
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTierDetail {
    pub tier: PriceTier,
    pub dish_min: f64,
    pub dish_max: f64,
    pub drink_min: f64,
    pub drink_max: f64,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// Conversation state
// =============================================================================

/// Persisted per-conversation state.
///
/// `filters` is kept as raw JSON at this layer; the chat crate owns its
/// typed interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub filters: serde_json::Value,
    pub last_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
