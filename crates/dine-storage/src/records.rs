//! Record store contract and the in-memory document implementation.
//!
//! Reference data (restaurants, menus, items, promotions, hours, price
//! tiers) is read through `RecordStore`. Documents are plain JSON objects in
//! the camelCase record shape; callers deserialize into the typed records
//! from `dine_core::types`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use dine_core::{
    DineError, Menu, MenuItem, OpeningHours, PriceTierDetail, Promotion, Restaurant,
};

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Restaurants,
    Menus,
    MenuItems,
    Promotions,
    OpeningHours,
    PriceTiers,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Restaurants => "restaurants",
            Collection::Menus => "menus",
            Collection::MenuItems => "menuItems",
            Collection::Promotions => "promotions",
            Collection::OpeningHours => "openingHours",
            Collection::PriceTiers => "priceTiers",
        }
    }
}

/// A single condition on a document field.
///
/// Array-valued fields match when any element matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Strict JSON equality.
    Eq { field: String, value: Value },
    /// No value equals `value`; documents without the field match.
    NotEq { field: String, value: Value },
    /// Case-insensitive text match, whole value or substring.
    Text {
        field: String,
        text: String,
        exact: bool,
    },
    /// Set membership; strings compare case-insensitively.
    In { field: String, values: Vec<Value> },
    /// Inclusive bounds over numbers or RFC 3339 timestamps.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    /// Document id is one of the given ids.
    IdIn(Vec<String>),
    /// At least one nested predicate holds.
    AnyOf(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn not_eq(field: &str, value: impl Into<Value>) -> Self {
        Predicate::NotEq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn contains(field: &str, text: &str) -> Self {
        Predicate::Text {
            field: field.to_string(),
            text: text.to_string(),
            exact: false,
        }
    }

    pub fn equals_ignore_case(field: &str, text: &str) -> Self {
        Predicate::Text {
            field: field.to_string(),
            text: text.to_string(),
            exact: true,
        }
    }

    pub fn range(field: &str, min: Option<Value>, max: Option<Value>) -> Self {
        Predicate::Range {
            field: field.to_string(),
            min,
            max,
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Predicate::Eq { field, value } => {
                any_value(doc.get(field.as_str()), |v| v == value)
            }
            Predicate::NotEq { field, value } => {
                !any_value(doc.get(field.as_str()), |v| v == value)
            }
            Predicate::Text { field, text, exact } => {
                let needle = text.to_lowercase();
                any_value(doc.get(field.as_str()), |v| match v.as_str() {
                    Some(s) if *exact => s.to_lowercase() == needle,
                    Some(s) => s.to_lowercase().contains(&needle),
                    None => false,
                })
            }
            Predicate::In { field, values } => any_value(doc.get(field.as_str()), |v| {
                values.iter().any(|candidate| loose_eq(v, candidate))
            }),
            Predicate::Range { field, min, max } => {
                any_value(doc.get(field.as_str()), |v| {
                    let above = min.as_ref().map_or(true, |m| {
                        compare_values(v, m).is_some_and(|o| o != Ordering::Less)
                    });
                    let below = max.as_ref().map_or(true, |m| {
                        compare_values(v, m).is_some_and(|o| o != Ordering::Greater)
                    });
                    above && below
                })
            }
            Predicate::IdIn(ids) => doc
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| ids.iter().any(|candidate| candidate == id)),
            Predicate::AnyOf(options) => options.iter().any(|p| p.matches(doc)),
        }
    }
}

/// Apply `f` to a scalar field or to each element of an array field.
fn any_value<F>(field: Option<&Value>, f: F) -> bool
where
    F: Fn(&Value) -> bool,
{
    match field {
        Some(Value::Array(items)) => items.iter().any(&f),
        Some(Value::Null) | None => false,
        Some(v) => f(v),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Order two scalar values. Numbers compare numerically, timestamps
/// chronologically and other strings lexically; mixed kinds are unordered.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A find request: all predicates must hold.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub collection: Collection,
    pub predicates: Vec<Predicate>,
    /// Field to sort by and whether ascending.
    pub sort: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            predicates: Vec::new(),
            sort: None,
            limit: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn sort_asc(mut self, field: &str) -> Self {
        self.sort = Some((field.to_string(), true));
        self
    }

    pub fn sort_desc(mut self, field: &str) -> Self {
        self.sort = Some((field.to_string(), false));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, doc: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(doc))
    }
}

/// Read-only access to reference records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Documents matching every predicate, sorted and capped as requested.
    async fn find(&self, query: &FindQuery) -> Result<Vec<Value>, DineError>;

    /// Distinct values of `field` across matching documents, in first-seen
    /// order. Array fields contribute each element.
    async fn distinct(
        &self,
        collection: Collection,
        field: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Value>, DineError>;
}

/// Fixture file layout: one array per collection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fixtures {
    pub restaurants: Vec<Value>,
    pub menus: Vec<Value>,
    pub menu_items: Vec<Value>,
    pub promotions: Vec<Value>,
    pub opening_hours: Vec<Value>,
    pub price_tiers: Vec<Value>,
}

/// In-process document store over JSON values.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<Collection, Vec<Value>>>,
}

impl MemoryRecordStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from fixtures, dropping documents that do not fit their
    /// record shape.
    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        let store = Self::default();
        store.load(Collection::Restaurants, validated::<Restaurant>(Collection::Restaurants, fixtures.restaurants));
        store.load(Collection::Menus, validated::<Menu>(Collection::Menus, fixtures.menus));
        store.load(Collection::MenuItems, validated::<MenuItem>(Collection::MenuItems, fixtures.menu_items));
        store.load(Collection::Promotions, validated::<Promotion>(Collection::Promotions, fixtures.promotions));
        store.load(
            Collection::OpeningHours,
            validated::<OpeningHours>(Collection::OpeningHours, fixtures.opening_hours),
        );
        store.load(
            Collection::PriceTiers,
            validated::<PriceTierDetail>(Collection::PriceTiers, fixtures.price_tiers),
        );
        store
    }

    /// Load a JSON fixture file.
    pub fn from_fixture_file(path: &Path) -> Result<Self, DineError> {
        let content = std::fs::read_to_string(path)?;
        let fixtures: Fixtures = serde_json::from_str(&content)?;
        let store = Self::from_fixtures(fixtures);
        info!(
            path = %path.display(),
            restaurants = store.len(Collection::Restaurants),
            menu_items = store.len(Collection::MenuItems),
            "Record fixtures loaded"
        );
        Ok(store)
    }

    /// Append documents to a collection.
    pub fn load(&self, collection: Collection, docs: Vec<Value>) {
        match self.collections.write() {
            Ok(mut guard) => guard.entry(collection).or_default().extend(docs),
            Err(e) => warn!(error = %e, "Record store lock poisoned, documents dropped"),
        }
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .map(|guard| guard.get(&collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.collections
            .read()
            .map(|guard| guard.values().all(Vec::is_empty))
            .unwrap_or(true)
    }

    fn matching(&self, collection: Collection, query: &FindQuery) -> Result<Vec<Value>, DineError> {
        let guard = self
            .collections
            .read()
            .map_err(|e| DineError::Storage(format!("Record store lock poisoned: {}", e)))?;
        Ok(guard
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default())
    }
}

fn validated<T: DeserializeOwned>(collection: Collection, docs: Vec<Value>) -> Vec<Value> {
    docs.into_iter()
        .filter(|doc| match serde_json::from_value::<T>(doc.clone()) {
            Ok(_) => true,
            Err(e) => {
                warn!(collection = collection.as_str(), error = %e, "Skipping malformed fixture document");
                false
            }
        })
        .collect()
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find(&self, query: &FindQuery) -> Result<Vec<Value>, DineError> {
        let mut docs = self.matching(query.collection, query)?;

        if let Some((field, ascending)) = &query.sort {
            docs.sort_by(|a, b| {
                let ord = match (a.get(field.as_str()), b.get(field.as_str())) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if *ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn distinct(
        &self,
        collection: Collection,
        field: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Value>, DineError> {
        let query = FindQuery::new(collection).filters(predicates.iter().cloned());
        let mut seen: Vec<Value> = Vec::new();
        for doc in self.matching(collection, &query)? {
            let values = match doc.get(field) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => continue,
                Some(v) => vec![v.clone()],
            };
            for v in values {
                if !seen.contains(&v) {
                    seen.push(v);
                }
            }
        }
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryRecordStore {
        let store = MemoryRecordStore::empty();
        store.load(
            Collection::Restaurants,
            vec![
                json!({"id": "r1", "name": "KFC Cambodia", "type": "fast_food", "ambience": ["casual", "family-friendly"], "status": "active"}),
                json!({"id": "r2", "name": "Luna Rooftop", "type": "fine_dining", "ambience": ["romantic", "scenic"], "status": "active"}),
                json!({"id": "r3", "name": "Brown Coffee", "type": "cafe", "ambience": ["work-friendly"], "status": "closed"}),
            ],
        );
        store.load(
            Collection::MenuItems,
            vec![
                json!({"id": "i1", "restaurantId": "r1", "name": "Zinger", "price": 4.5}),
                json!({"id": "i2", "restaurantId": "r2", "name": "Wagyu", "price": 45.0}),
                json!({"id": "i3", "restaurantId": "r1", "name": "Fries", "price": 1.5}),
            ],
        );
        store
    }

    // ---- Predicates ----

    #[test]
    fn test_text_predicate_case_insensitive() {
        let doc = json!({"name": "KFC Cambodia"});
        assert!(Predicate::contains("name", "kfc").matches(&doc));
        assert!(!Predicate::equals_ignore_case("name", "kfc").matches(&doc));
        assert!(Predicate::equals_ignore_case("name", "kfc cambodia").matches(&doc));
    }

    #[test]
    fn test_in_predicate_over_array_field() {
        let doc = json!({"ambience": ["Quiet", "cozy"]});
        let p = Predicate::In {
            field: "ambience".into(),
            values: vec![json!("quiet"), json!("romantic")],
        };
        assert!(p.matches(&doc));
        let miss = Predicate::In {
            field: "ambience".into(),
            values: vec![json!("lively")],
        };
        assert!(!miss.matches(&doc));
    }

    #[test]
    fn test_not_eq_matches_missing_field() {
        let available = Predicate::not_eq("availability", false);
        assert!(available.matches(&json!({"name": "Soup"})));
        assert!(available.matches(&json!({"availability": true})));
        assert!(!available.matches(&json!({"availability": false})));
    }

    #[test]
    fn test_range_numeric_and_timestamp() {
        let price = Predicate::range("price", Some(json!(2)), Some(json!(5)));
        assert!(price.matches(&json!({"price": 4.5})));
        assert!(price.matches(&json!({"price": 5})));
        assert!(!price.matches(&json!({"price": 5.5})));
        assert!(!price.matches(&json!({})));

        let window = Predicate::range(
            "startDate",
            None,
            Some(json!("2026-06-01T00:00:00Z")),
        );
        assert!(window.matches(&json!({"startDate": "2026-05-01T00:00:00+07:00"})));
        assert!(!window.matches(&json!({"startDate": "2026-07-01T00:00:00Z"})));
    }

    #[test]
    fn test_any_of_and_id_in() {
        let doc = json!({"id": "r9", "tags": ["wifi"], "description": "Quiet corner"});
        let any = Predicate::AnyOf(vec![
            Predicate::contains("tags", "garden"),
            Predicate::contains("description", "quiet"),
        ]);
        assert!(any.matches(&doc));
        assert!(Predicate::IdIn(vec!["r9".into()]).matches(&doc));
        assert!(!Predicate::IdIn(vec![]).matches(&doc));
    }

    #[test]
    fn test_null_field_never_matches() {
        let doc = json!({"openTime": null});
        assert!(!Predicate::eq("openTime", Value::Null).matches(&doc));
    }

    // ---- Store ----

    #[tokio::test]
    async fn test_find_with_sort_and_limit() {
        let store = store();
        let query = FindQuery::new(Collection::MenuItems)
            .filter(Predicate::eq("restaurantId", "r1"))
            .sort_asc("price")
            .limit(1);
        let items = store.find(&query).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "Fries");
    }

    #[tokio::test]
    async fn test_find_sort_desc() {
        let store = store();
        let items = store
            .find(&FindQuery::new(Collection::MenuItems).sort_desc("price"))
            .await
            .unwrap();
        assert_eq!(items[0]["name"], "Wagyu");
    }

    #[tokio::test]
    async fn test_find_unknown_collection_is_empty() {
        let store = store();
        let found = store.find(&FindQuery::new(Collection::Promotions)).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_preserves_first_seen_order() {
        let store = store();
        let ids = store
            .distinct(
                Collection::MenuItems,
                "restaurantId",
                &[Predicate::range("price", None, Some(json!(10)))],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![json!("r1")]);

        let ambience = store
            .distinct(Collection::Restaurants, "ambience", &[])
            .await
            .unwrap();
        assert_eq!(ambience.len(), 5);
        assert_eq!(ambience[0], json!("casual"));
    }

    #[test]
    fn test_fixtures_skip_malformed() {
        let fixtures: Fixtures = serde_json::from_value(json!({
            "restaurants": [{"id": "r1", "name": "Ok"}],
            "openingHours": [
                {"restaurantId": "r1", "dayOfWeek": "MON", "openTime": "09:00", "closeTime": "22:00"},
                {"restaurantId": "r1", "dayOfWeek": "FUNDAY"}
            ]
        }))
        .unwrap();
        let store = MemoryRecordStore::from_fixtures(fixtures);
        assert_eq!(store.len(Collection::Restaurants), 1);
        assert_eq!(store.len(Collection::OpeningHours), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_from_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        std::fs::write(
            &path,
            r#"{"restaurants": [{"id": "r1", "name": "Pho 24"}], "priceTiers": []}"#,
        )
        .unwrap();
        let store = MemoryRecordStore::from_fixture_file(&path).unwrap();
        assert_eq!(store.len(Collection::Restaurants), 1);

        let missing = MemoryRecordStore::from_fixture_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(DineError::Io(_))));
    }
}
