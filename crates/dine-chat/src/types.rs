//! Pipeline types: intents, query plans and retrieval results.

use serde::{Deserialize, Serialize};

use dine_core::{
    DayOfWeek, Menu, MenuItem, OpeningHours, PriceTierDetail, Promotion, Restaurant,
};

use crate::filter::{FilterValue, Filters};

/// Upper bound on the number of records a single intent may ask for.
pub const MAX_INTENT_LIMIT: usize = 50;

/// Which retrieval routine an intent is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Restaurant,
    Menu,
    Promotion,
    OpeningHours,
    PriceTier,
    IsOpenNow,
    OpenNow,
    OpenAt,
}

impl Target {
    pub const ALL: [Target; 8] = [
        Target::Restaurant,
        Target::Menu,
        Target::Promotion,
        Target::OpeningHours,
        Target::PriceTier,
        Target::IsOpenNow,
        Target::OpenNow,
        Target::OpenAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Restaurant => "restaurant",
            Target::Menu => "menu",
            Target::Promotion => "promotion",
            Target::OpeningHours => "opening_hours",
            Target::PriceTier => "price_tier",
            Target::IsOpenNow => "is_open_now",
            Target::OpenNow => "open_now",
            Target::OpenAt => "open_at",
        }
    }

    /// Parse a target name, tolerating case, spaces and dashes.
    pub fn parse(s: &str) -> Option<Self> {
        let canonical = s.trim().to_lowercase().replace([' ', '-'], "_");
        Target::ALL.into_iter().find(|t| t.as_str() == canonical)
    }
}

/// One structured interpretation of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub target: Target,
    pub filters: Filters,
    pub limit: usize,
}

impl Intent {
    /// Build an intent, capping `limit` at [`MAX_INTENT_LIMIT`].
    pub fn new(target: Target, filters: Filters, limit: usize) -> Self {
        Self {
            target,
            filters,
            limit: limit.min(MAX_INTENT_LIMIT),
        }
    }
}

/// Ordered intents for one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub intents: Vec<Intent>,
}

impl QueryPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(intent: Intent) -> Self {
        Self {
            intents: vec![intent],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Filters of the first menu intent with a price ceiling.
    pub fn budget_menu_filters(&self) -> Option<&Filters> {
        self.intents
            .iter()
            .filter(|i| i.target == Target::Menu)
            .map(|i| &i.filters)
            .find(|filters| {
                filters
                    .get("price")
                    .and_then(FilterValue::bounds)
                    .is_some_and(|(_, max)| max.is_some())
            })
    }
}

// =============================================================================
// Retrieval results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayHours {
    pub day: DayOfWeek,
    pub open_time: String,
    pub close_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantView {
    #[serde(flatten)]
    pub restaurant: Restaurant,
    /// Up to three items that satisfied a price constraint.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matching_items: Vec<MenuItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub today_hours: Option<TodayHours>,
}

impl RestaurantView {
    pub fn plain(restaurant: Restaurant) -> Self {
        Self {
            restaurant,
            matching_items: Vec::new(),
            today_hours: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuView {
    #[serde(flatten)]
    pub menu: Menu,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_name: Option<String>,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemView {
    #[serde(flatten)]
    pub item: MenuItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionView {
    #[serde(flatten)]
    pub promotion: Promotion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoursView {
    #[serde(flatten)]
    pub hours: OpeningHours,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_name: Option<String>,
}

/// Whether one restaurant is open at the evaluated moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenStatus {
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub day: DayOfWeek,
    pub current_time: String,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub is_open: bool,
}

/// A retrieved record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Restaurant(RestaurantView),
    Menu(MenuView),
    MenuItem(MenuItemView),
    Promotion(PromotionView),
    OpeningHours(HoursView),
    OpenStatus(OpenStatus),
    PriceTier(PriceTierDetail),
}

impl Record {
    /// Human-facing label: name, title or tier.
    pub fn label(&self) -> String {
        match self {
            Record::Restaurant(r) => r.restaurant.name.clone(),
            Record::Menu(m) => match &m.restaurant_name {
                Some(name) => format!("{} ({})", m.menu.name, name),
                None => m.menu.name.clone(),
            },
            Record::MenuItem(i) => i.item.name.clone(),
            Record::Promotion(p) => p.promotion.title.clone(),
            Record::OpeningHours(h) => h
                .restaurant_name
                .clone()
                .unwrap_or_else(|| h.hours.restaurant_id.clone()),
            Record::OpenStatus(s) => s.restaurant_name.clone(),
            Record::PriceTier(t) => t.tier.to_string(),
        }
    }
}

/// Outcome of one intent. `error` is set when retrieval failed; the records
/// are then empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub records: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntentResult {
    pub fn ok(intent: Intent, records: Vec<Record>) -> Self {
        Self {
            intent,
            records,
            error: None,
        }
    }

    pub fn failed(intent: Intent, error: impl Into<String>) -> Self {
        Self {
            intent,
            records: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}
