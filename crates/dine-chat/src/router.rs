//! Query routing: executes a plan against the record store.
//!
//! Each intent is dispatched to the retrieval routine for its target. Intents
//! run in order and independently; a failing intent is reported in its own
//! [`IntentResult`] and never aborts the rest of the plan.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use dine_core::{
    DayOfWeek, DineError, Menu, MenuItem, OpeningHours, PriceTierDetail, Promotion, Restaurant,
};
use dine_storage::{Collection, FindQuery, Predicate, RecordStore};

use crate::filter::{FilterValue, Filters};
use crate::types::{
    HoursView, Intent, IntentResult, MenuItemView, MenuView, OpenStatus, PromotionView, QueryPlan,
    Record, RestaurantView, Target, TodayHours,
};

/// Items shown alongside a restaurant found through a price search.
const MATCHING_ITEMS_PER_RESTAURANT: usize = 3;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at a fixed instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// =============================================================================
// Opening-hours arithmetic
// =============================================================================

/// Minutes since midnight for an `HH:MM` string.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let (h, m): (u32, u32) = (h.parse().ok()?, m.get(..2).unwrap_or(m).parse().ok()?);
    (h <= 23 && m <= 59).then_some(h * 60 + m)
}

/// Whether `minutes` falls inside `[open, close]`. A close time earlier than
/// the open time wraps past midnight.
pub fn is_open_at(open: u32, close: u32, minutes: u32) -> bool {
    if close < open {
        minutes >= open || minutes <= close
    } else {
        minutes >= open && minutes <= close
    }
}

fn hours_window(hours: &OpeningHours) -> Option<(u32, u32)> {
    let open = parse_hhmm(hours.open_time.as_deref()?)?;
    let close = parse_hhmm(hours.close_time.as_deref()?)?;
    Some((open, close))
}

fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

// =============================================================================
// Decoding and predicate helpers
// =============================================================================

fn decode<T: DeserializeOwned>(collection: Collection, docs: Vec<Value>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection = collection.as_str(), error = %e, "Skipping undecodable record");
                None
            }
        })
        .collect()
}

/// Text predicate for every string in `value`; several strings match any.
fn text_predicate(field: &str, value: &FilterValue, exact: bool) -> Option<Predicate> {
    let mut options: Vec<Predicate> = value
        .strings()
        .iter()
        .map(|s| {
            if exact {
                Predicate::equals_ignore_case(field, s)
            } else {
                Predicate::contains(field, s)
            }
        })
        .collect();
    match options.len() {
        0 => None,
        1 => options.pop(),
        _ => Some(Predicate::AnyOf(options)),
    }
}

fn membership_predicate(field: &str, value: &FilterValue) -> Option<Predicate> {
    let values: Vec<Value> = value.strings().into_iter().map(Value::String).collect();
    (!values.is_empty()).then(|| Predicate::In {
        field: field.to_string(),
        values,
    })
}

fn numeric_range(field: &str, value: &FilterValue) -> Option<Predicate> {
    let (min, max) = value.bounds()?;
    Some(Predicate::range(field, min.map(Value::from), max.map(Value::from)))
}

fn restaurant_predicates(filters: &Filters) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    for (key, value) in filters {
        let predicate = match key.as_str() {
            "name" | "category" | "cuisine" => text_predicate(key, value, false),
            "type" | "status" => text_predicate(key, value, true),
            "ambience" => membership_predicate("ambience", value),
            "priceTier" => membership_predicate("priceTier", value),
            "hasPrivateRooms" => value.as_bool().map(|b| Predicate::eq("hasPrivateRooms", b)),
            "textSearch" => value.as_str().map(|q| {
                Predicate::AnyOf(
                    ["ambience", "tags", "description", "name", "cuisine"]
                        .iter()
                        .map(|field| Predicate::contains(field, q))
                        .collect(),
                )
            }),
            // price is resolved through menu items.
            _ => None,
        };
        predicates.extend(predicate);
    }
    predicates
}

fn item_predicates(filters: &Filters) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    for (key, value) in filters {
        let predicate = match key.as_str() {
            "name" => text_predicate("name", value, false),
            "price" => numeric_range("price", value),
            "itemType" => text_predicate("itemType", value, true),
            "isSignature" => value.as_bool().map(|b| Predicate::eq("isSignature", b)),
            _ => None,
        };
        predicates.extend(predicate);
    }
    predicates
}

fn group_by_restaurant(items: Vec<MenuItem>) -> Vec<(String, Vec<MenuItem>)> {
    let mut groups: Vec<(String, Vec<MenuItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(id, _)| *id == item.restaurant_id) {
            Some((_, matched)) => {
                if matched.len() < MATCHING_ITEMS_PER_RESTAURANT {
                    matched.push(item);
                }
            }
            None => groups.push((item.restaurant_id.clone(), vec![item])),
        }
    }
    groups
}

/// Resolve a restaurant by name: exact (case-insensitive) first, then
/// substring.
pub async fn resolve_restaurant(store: &dyn RecordStore, name: &str) -> Result<Option<Restaurant>, DineError> {
    for predicate in [
        Predicate::equals_ignore_case("name", name),
        Predicate::contains("name", name),
    ] {
        let docs = store
            .find(&FindQuery::new(Collection::Restaurants).filter(predicate).limit(1))
            .await?;
        if let Some(restaurant) = decode::<Restaurant>(Collection::Restaurants, docs).pop() {
            return Ok(Some(restaurant));
        }
    }
    debug!(name, "Restaurant name did not resolve");
    Ok(None)
}

/// Resolve `restaurantName` when present. `Ok(None)` means a name was given
/// but matched nothing; `Ok(Some(None))` means the filters are unscoped.
pub async fn scoped_restaurant(
    store: &dyn RecordStore,
    filters: &Filters,
) -> Result<Option<Option<Restaurant>>, DineError> {
    match filters.get("restaurantName").and_then(FilterValue::as_str) {
        Some(name) => Ok(resolve_restaurant(store, name).await?.map(Some)),
        None => Ok(Some(None)),
    }
}

/// Restaurants with available menu items inside a price range.
///
/// Signature dishes are preferred: only when no available signature item is
/// in range does any available item count. The distinct restaurant ids of
/// the qualifying items are returned in order of their cheapest matching
/// item, each with up to three matching items.
pub async fn resolve_restaurants_by_menu_price(
    store: &dyn RecordStore,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Vec<(String, Vec<MenuItem>)>, DineError> {
    let in_range = Predicate::range("price", min.map(Value::from), max.map(Value::from));
    let available = Predicate::not_eq("availability", false);

    let mut predicates = vec![in_range.clone(), available.clone(), Predicate::eq("isSignature", true)];
    let mut ids = store
        .distinct(Collection::MenuItems, "restaurantId", &predicates)
        .await?;
    if ids.is_empty() {
        predicates = vec![in_range, available];
        ids = store
            .distinct(Collection::MenuItems, "restaurantId", &predicates)
            .await?;
    }
    if ids.is_empty() {
        debug!(?min, ?max, "No restaurant has items in the price range");
        return Ok(Vec::new());
    }

    let query = FindQuery::new(Collection::MenuItems)
        .filters(predicates)
        .filter(Predicate::In {
            field: "restaurantId".to_string(),
            values: ids,
        })
        .sort_asc("price");
    let items: Vec<MenuItem> = decode(Collection::MenuItems, store.find(&query).await?);

    let groups = group_by_restaurant(items);
    debug!(restaurants = groups.len(), ?min, ?max, "Resolved restaurants by menu price");
    Ok(groups)
}

// =============================================================================
// Router
// =============================================================================

pub struct QueryRouter {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl QueryRouter {
    /// `utc_offset_hours` fixes the zone used for "today" and "now".
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours.saturating_mul(3600)).unwrap_or_else(|| {
            warn!(utc_offset_hours, "Invalid UTC offset, using UTC");
            Utc.fix()
        });
        Self {
            store,
            clock,
            offset,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Weekday and minutes since midnight in the reference zone.
    pub fn local_now(&self) -> (DayOfWeek, u32) {
        let local = self.clock.now().with_timezone(&self.offset);
        (
            DayOfWeek::from(local.weekday()),
            local.hour() * 60 + local.minute(),
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Execute every intent of `plan` in order.
    pub async fn execute(&self, plan: &QueryPlan) -> Vec<IntentResult> {
        let mut results = Vec::with_capacity(plan.intents.len());
        for intent in &plan.intents {
            match self.run_intent(intent).await {
                Ok(mut records) => {
                    records.truncate(intent.limit);
                    debug!(
                        intent_target = intent.target.as_str(),
                        records = records.len(),
                        "Intent executed"
                    );
                    results.push(IntentResult::ok(intent.clone(), records));
                }
                Err(e) => {
                    warn!(intent_target = intent.target.as_str(), error = %e, "Intent retrieval failed");
                    results.push(IntentResult::failed(intent.clone(), e.to_string()));
                }
            }
        }
        results
    }

    pub async fn run_intent(&self, intent: &Intent) -> Result<Vec<Record>, DineError> {
        let filters = &intent.filters;
        let limit = intent.limit;
        match intent.target {
            Target::Restaurant => Ok(self
                .find_restaurants(filters, Vec::new(), limit)
                .await?
                .into_iter()
                .map(Record::Restaurant)
                .collect()),
            Target::Menu => self.find_menus(filters, limit).await,
            Target::Promotion => self.find_promotions(filters, limit).await,
            Target::OpeningHours => self.find_hours(filters, limit).await,
            Target::PriceTier => self.find_price_tiers(filters, limit).await,
            Target::IsOpenNow => self.check_open_now(filters).await,
            Target::OpenNow => {
                let (day, minutes) = self.local_now();
                self.find_open_at(filters, day, minutes, limit).await
            }
            Target::OpenAt => {
                let (today, now_minutes) = self.local_now();
                let day = filters
                    .get("day")
                    .and_then(FilterValue::as_str)
                    .and_then(DayOfWeek::parse)
                    .unwrap_or(today);
                let minutes = filters
                    .get("time")
                    .and_then(FilterValue::as_str)
                    .and_then(parse_hhmm)
                    .unwrap_or(now_minutes);
                self.find_open_at(filters, day, minutes, limit).await
            }
        }
    }

    // ---- Shared lookups ----

    pub async fn resolve_restaurant(&self, name: &str) -> Result<Option<Restaurant>, DineError> {
        resolve_restaurant(self.store.as_ref(), name).await
    }

    async fn restaurant_names(&self, ids: Vec<String>) -> Result<HashMap<String, String>, DineError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs = self
            .store
            .find(&FindQuery::new(Collection::Restaurants).filter(Predicate::IdIn(ids)))
            .await?;
        Ok(decode::<Restaurant>(Collection::Restaurants, docs)
            .into_iter()
            .map(|r| (r.id, r.name))
            .collect())
    }

    async fn scoped_restaurant(&self, filters: &Filters) -> Result<Option<Option<Restaurant>>, DineError> {
        scoped_restaurant(self.store.as_ref(), filters).await
    }

    // ---- Restaurants ----

    async fn find_restaurants(
        &self,
        filters: &Filters,
        extra: Vec<Predicate>,
        limit: usize,
    ) -> Result<Vec<RestaurantView>, DineError> {
        let mut predicates = restaurant_predicates(filters);
        predicates.extend(extra);

        let mut matched_items: HashMap<String, Vec<MenuItem>> = HashMap::new();
        if let Some((min, max)) = filters.get("price").and_then(FilterValue::bounds) {
            let groups = resolve_restaurants_by_menu_price(self.store.as_ref(), min, max).await?;
            if groups.is_empty() {
                return Ok(Vec::new());
            }
            predicates.push(Predicate::IdIn(groups.iter().map(|(id, _)| id.clone()).collect()));
            matched_items.extend(groups);
        }

        let query = FindQuery::new(Collection::Restaurants)
            .filters(predicates)
            .limit(limit);
        let docs = self.store.find(&query).await?;
        Ok(decode::<Restaurant>(Collection::Restaurants, docs)
            .into_iter()
            .map(|restaurant| {
                let items = matched_items.remove(&restaurant.id).unwrap_or_default();
                RestaurantView {
                    matching_items: items,
                    ..RestaurantView::plain(restaurant)
                }
            })
            .collect())
    }

    // ---- Menus ----

    async fn available_items(&self, predicates: Vec<Predicate>) -> Result<Vec<MenuItem>, DineError> {
        let query = FindQuery::new(Collection::MenuItems)
            .filters(predicates)
            .sort_asc("price");
        let mut items: Vec<MenuItem> = decode(Collection::MenuItems, self.store.find(&query).await?);
        items.retain(|item| item.availability);
        Ok(items)
    }

    async fn find_menus(&self, filters: &Filters, limit: usize) -> Result<Vec<Record>, DineError> {
        let item_filters = item_predicates(filters);
        let item_scoped = !item_filters.is_empty();

        let Some(scope) = self.scoped_restaurant(filters).await? else {
            return Ok(Vec::new());
        };

        let Some(restaurant) = scope else {
            if item_scoped {
                // Dish search across every restaurant, cheapest first.
                let mut items = self.available_items(item_filters).await?;
                items.truncate(limit);
                let ids = items.iter().map(|i| i.restaurant_id.clone()).collect();
                let names = self.restaurant_names(ids).await?;
                return Ok(items
                    .into_iter()
                    .map(|item| {
                        let restaurant_name = names.get(&item.restaurant_id).cloned();
                        Record::MenuItem(MenuItemView {
                            item,
                            restaurant_name,
                        })
                    })
                    .collect());
            }
            let docs = self
                .store
                .find(&FindQuery::new(Collection::Menus).limit(limit))
                .await?;
            let menus: Vec<Menu> = decode(Collection::Menus, docs);
            let names = self
                .restaurant_names(menus.iter().map(|m| m.restaurant_id.clone()).collect())
                .await?;
            let mut records = Vec::new();
            for menu in menus.into_iter().filter(|m| m.visible) {
                let items = self
                    .available_items(vec![Predicate::eq("menuId", menu.id.as_str())])
                    .await?;
                records.push(Record::Menu(MenuView {
                    restaurant_name: names.get(&menu.restaurant_id).cloned(),
                    menu,
                    items,
                }));
            }
            return Ok(records);
        };

        let menu_docs = self
            .store
            .find(&FindQuery::new(Collection::Menus).filter(Predicate::eq("restaurantId", restaurant.id.as_str())))
            .await?;
        let menus: Vec<Menu> = decode::<Menu>(Collection::Menus, menu_docs)
            .into_iter()
            .filter(|m| m.visible)
            .collect();

        let mut predicates = item_filters;
        predicates.push(Predicate::eq("restaurantId", restaurant.id.as_str()));
        let mut items = self.available_items(predicates).await?;

        if menus.is_empty() {
            items.truncate(limit);
            return Ok(items
                .into_iter()
                .map(|item| {
                    Record::MenuItem(MenuItemView {
                        item,
                        restaurant_name: Some(restaurant.name.clone()),
                    })
                })
                .collect());
        }

        let mut records = Vec::new();
        for menu in menus {
            let (mine, rest): (Vec<MenuItem>, Vec<MenuItem>) =
                items.into_iter().partition(|i| i.menu_id == menu.id);
            items = rest;
            if item_scoped && mine.is_empty() {
                continue;
            }
            records.push(Record::Menu(MenuView {
                menu,
                restaurant_name: Some(restaurant.name.clone()),
                items: mine.into_iter().take(limit).collect(),
            }));
        }
        Ok(records)
    }

    // ---- Promotions ----

    async fn find_promotions(&self, filters: &Filters, limit: usize) -> Result<Vec<Record>, DineError> {
        let Some(scope) = self.scoped_restaurant(filters).await? else {
            return Ok(Vec::new());
        };

        let mut predicates = Vec::new();
        if let Some(restaurant) = &scope {
            predicates.push(Predicate::eq("restaurantId", restaurant.id.as_str()));
        }
        if let Some(p) = filters.get("title").and_then(|v| text_predicate("title", v, false)) {
            predicates.push(p);
        }
        if let Some(p) = filters.get("discountPercent").and_then(|v| numeric_range("discountPercent", v)) {
            predicates.push(p);
        }

        let start = filters.get("startDate").and_then(FilterValue::as_str);
        let end = filters.get("endDate").and_then(FilterValue::as_str);
        if start.is_none() && end.is_none() {
            let now = Value::String(self.clock.now().to_rfc3339());
            predicates.push(Predicate::range("startDate", None, Some(now.clone())));
            predicates.push(Predicate::range("endDate", Some(now), None));
        } else {
            if let Some(start) = start {
                predicates.push(Predicate::range("startDate", Some(Value::from(start)), None));
            }
            if let Some(end) = end {
                predicates.push(Predicate::range("endDate", None, Some(Value::from(end))));
            }
        }

        let status = filters
            .get("status")
            .and_then(FilterValue::as_str)
            .unwrap_or("active")
            .to_string();

        let query = FindQuery::new(Collection::Promotions)
            .filters(predicates)
            .sort_desc("discountPercent");
        let promotions: Vec<Promotion> = decode::<Promotion>(Collection::Promotions, self.store.find(&query).await?)
            .into_iter()
            .filter(|p| p.status.as_str() == status)
            .take(limit)
            .collect();

        let names = match &scope {
            Some(r) => HashMap::from([(r.id.clone(), r.name.clone())]),
            None => {
                self.restaurant_names(promotions.iter().map(|p| p.restaurant_id.clone()).collect())
                    .await?
            }
        };
        Ok(promotions
            .into_iter()
            .map(|promotion| {
                let restaurant_name = names.get(&promotion.restaurant_id).cloned();
                Record::Promotion(PromotionView {
                    promotion,
                    restaurant_name,
                })
            })
            .collect())
    }

    // ---- Opening hours ----

    async fn find_hours(&self, filters: &Filters, limit: usize) -> Result<Vec<Record>, DineError> {
        let Some(scope) = self.scoped_restaurant(filters).await? else {
            return Ok(Vec::new());
        };

        let mut query = FindQuery::new(Collection::OpeningHours);
        if let Some(p) = filters.get("dayOfWeek").and_then(|v| membership_predicate("dayOfWeek", v)) {
            query = query.filter(p);
        }

        let (hours, names) = match scope {
            Some(restaurant) => {
                let query = query.filter(Predicate::eq("restaurantId", restaurant.id.as_str()));
                let mut hours: Vec<OpeningHours> = decode(Collection::OpeningHours, self.store.find(&query).await?);
                hours.sort_by_key(|h| h.day_of_week);
                // A named restaurant always gets its whole week.
                hours.truncate(limit.max(7));
                (hours, HashMap::from([(restaurant.id, restaurant.name)]))
            }
            None => {
                let hours: Vec<OpeningHours> =
                    decode(Collection::OpeningHours, self.store.find(&query.limit(limit)).await?);
                let names = self
                    .restaurant_names(hours.iter().map(|h| h.restaurant_id.clone()).collect())
                    .await?;
                (hours, names)
            }
        };

        Ok(hours
            .into_iter()
            .map(|hours| {
                let restaurant_name = names.get(&hours.restaurant_id).cloned();
                Record::OpeningHours(HoursView {
                    hours,
                    restaurant_name,
                })
            })
            .collect())
    }

    async fn hours_for_day(&self, day: DayOfWeek, extra: Option<Predicate>) -> Result<Vec<OpeningHours>, DineError> {
        let query = FindQuery::new(Collection::OpeningHours)
            .filter(Predicate::eq("dayOfWeek", day.as_str()))
            .filters(extra);
        Ok(decode(Collection::OpeningHours, self.store.find(&query).await?))
    }

    // ---- Open now / open at ----

    async fn check_open_now(&self, filters: &Filters) -> Result<Vec<Record>, DineError> {
        let Some(name) = filters.get("restaurantName").and_then(FilterValue::as_str) else {
            return Ok(Vec::new());
        };
        let Some(restaurant) = self.resolve_restaurant(name).await? else {
            return Ok(Vec::new());
        };

        let (day, minutes) = self.local_now();
        let today = self
            .hours_for_day(day, Some(Predicate::eq("restaurantId", restaurant.id.as_str())))
            .await?
            .into_iter()
            .next();

        let window = today.as_ref().and_then(hours_window);
        let is_open = window.is_some_and(|(open, close)| is_open_at(open, close, minutes));
        Ok(vec![Record::OpenStatus(OpenStatus {
            restaurant_id: restaurant.id,
            restaurant_name: restaurant.name,
            day,
            current_time: format_minutes(minutes),
            open_time: today.as_ref().and_then(|h| h.open_time.clone()),
            close_time: today.and_then(|h| h.close_time),
            is_open,
        })])
    }

    async fn find_open_at(
        &self,
        filters: &Filters,
        day: DayOfWeek,
        minutes: u32,
        limit: usize,
    ) -> Result<Vec<Record>, DineError> {
        let mut open: HashMap<String, TodayHours> = HashMap::new();
        for hours in self.hours_for_day(day, None).await? {
            let Some((o, c)) = hours_window(&hours) else {
                continue;
            };
            if is_open_at(o, c, minutes) {
                open.insert(
                    hours.restaurant_id.clone(),
                    TodayHours {
                        day,
                        open_time: format_minutes(o),
                        close_time: format_minutes(c),
                    },
                );
            }
        }
        debug!(day = day.as_str(), time = %format_minutes(minutes), open = open.len(), "Open restaurants");
        if open.is_empty() {
            return Ok(Vec::new());
        }

        let ids = open.keys().cloned().collect();
        let restaurants = self
            .find_restaurants(filters, vec![Predicate::IdIn(ids)], limit)
            .await?;
        Ok(restaurants
            .into_iter()
            .map(|mut view| {
                view.today_hours = open.remove(&view.restaurant.id);
                Record::Restaurant(view)
            })
            .collect())
    }

    // ---- Price tiers ----

    async fn find_price_tiers(&self, filters: &Filters, limit: usize) -> Result<Vec<Record>, DineError> {
        let mut query = FindQuery::new(Collection::PriceTiers).limit(limit);
        if let Some(p) = filters.get("tier").and_then(|v| membership_predicate("tier", v)) {
            query = query.filter(p);
        }
        let tiers: Vec<PriceTierDetail> = decode(Collection::PriceTiers, self.store.find(&query).await?);
        Ok(tiers.into_iter().map(Record::PriceTier).collect())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use dine_storage::MemoryRecordStore;
    use serde_json::json;

    fn intent(target: Target, filters: serde_json::Value, limit: usize) -> Intent {
        Intent::new(target, crate::filter::filters_from_json(&filters), limit)
    }

    async fn run(router: &QueryRouter, intent: Intent) -> Vec<Record> {
        let mut results = router.execute(&QueryPlan::single(intent)).await;
        let result = results.remove(0);
        assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
        result.records
    }

    // ---- Hours arithmetic ----

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("23:59:00"), Some(1439));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("nine"), None);
    }

    #[test]
    fn test_overnight_window() {
        let (open, close) = (22 * 60, 2 * 60);
        assert!(is_open_at(open, close, 23 * 60 + 30));
        assert!(is_open_at(open, close, 60));
        assert!(!is_open_at(open, close, 10 * 60));
    }

    #[test]
    fn test_same_day_window_inclusive() {
        assert!(is_open_at(540, 1320, 540));
        assert!(is_open_at(540, 1320, 1320));
        assert!(!is_open_at(540, 1320, 1321));
    }

    #[test]
    fn test_local_now_uses_offset() {
        let router = router_at(0, 30);
        assert_eq!(router.local_now(), (DayOfWeek::Mon, 30));
    }

    // ---- Price translation ----

    #[tokio::test]
    async fn test_price_resolution_prefers_signature() {
        let store = sample_store();
        let groups = resolve_restaurants_by_menu_price(store.as_ref(), None, Some(5.0)).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "r1");
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[0].1[0].name, "Zinger Burger");
    }

    #[tokio::test]
    async fn test_price_resolution_falls_back_without_signature() {
        let store = MemoryRecordStore::empty();
        store.load(
            Collection::MenuItems,
            vec![
                json!({"id": "a", "restaurantId": "x", "name": "Tea", "price": 1.0}),
                json!({"id": "b", "restaurantId": "x", "name": "Coffee", "price": 2.0}),
                json!({"id": "c", "restaurantId": "y", "name": "Juice", "price": 3.0}),
                json!({"id": "d", "restaurantId": "y", "name": "Gone", "price": 0.5, "availability": false}),
            ],
        );
        let groups = resolve_restaurants_by_menu_price(&store, Some(1.0), Some(3.0)).await.unwrap();
        let ids: Vec<&str> = groups.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_price_resolution_caps_items_per_restaurant() {
        let store = MemoryRecordStore::empty();
        let items = (0..5)
            .map(|n| json!({"id": format!("i{}", n), "restaurantId": "x", "name": format!("Dish {}", n), "price": n}))
            .collect();
        store.load(Collection::MenuItems, items);
        let groups = resolve_restaurants_by_menu_price(&store, None, Some(10.0)).await.unwrap();
        assert_eq!(groups[0].1.len(), MATCHING_ITEMS_PER_RESTAURANT);
    }

    #[tokio::test]
    async fn test_price_resolution_uses_distinct_restaurant_ids() {
        use async_trait::async_trait;

        /// Finds like the sample store but reports no distinct values.
        struct NoDistinct(Arc<MemoryRecordStore>);

        #[async_trait]
        impl RecordStore for NoDistinct {
            async fn find(&self, query: &FindQuery) -> Result<Vec<Value>, DineError> {
                self.0.find(query).await
            }

            async fn distinct(&self, _: Collection, _: &str, _: &[Predicate]) -> Result<Vec<Value>, DineError> {
                Ok(Vec::new())
            }
        }

        let store = NoDistinct(sample_store());
        let groups = resolve_restaurants_by_menu_price(&store, None, Some(5.0)).await.unwrap();
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn test_restaurant_price_filter_annotates_items() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Restaurant, json!({"price": {"max": 10}}), 10)).await;
        assert_eq!(records.len(), 1);
        let Record::Restaurant(view) = &records[0] else { panic!("expected restaurant") };
        assert_eq!(view.restaurant.id, "r1");
        assert_eq!(view.matching_items[0].name, "Zinger Burger");
    }

    #[tokio::test]
    async fn test_restaurant_price_without_matches_is_empty() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Restaurant, json!({"price": {"max": 1}}), 10)).await;
        assert!(records.is_empty());
    }

    // ---- Restaurant filters ----

    #[tokio::test]
    async fn test_restaurant_filters() {
        let router = router_at(12, 0);
        let records = run(
            &router,
            intent(Target::Restaurant, json!({"ambience": ["romantic", "quiet"], "hasPrivateRooms": true}), 10),
        )
        .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "Luna Rooftop");

        let records = run(&router, intent(Target::Restaurant, json!({"type": "FAST_FOOD"}), 10)).await;
        assert_eq!(records[0].label(), "KFC Cambodia");

        let records = run(&router, intent(Target::Restaurant, json!({"priceTier": "BUDGET"}), 1)).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_text_search() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Restaurant, json!({"textSearch": "scenic"}), 10)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "Luna Rooftop");
    }

    // ---- Menus ----

    #[tokio::test]
    async fn test_menu_by_restaurant_name() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Menu, json!({"restaurantName": "kfc"}), 20)).await;
        assert_eq!(records.len(), 1);
        let Record::Menu(menu) = &records[0] else { panic!("expected menu") };
        assert_eq!(menu.restaurant_name.as_deref(), Some("KFC Cambodia"));
        let names: Vec<&str> = menu.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Fries", "Zinger Burger"]);
    }

    #[tokio::test]
    async fn test_menu_unknown_restaurant_is_empty() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Menu, json!({"restaurantName": "Nowhere"}), 20)).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_menu_price_only_cheapest_first() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Menu, json!({"price": {"max": 10}}), 20)).await;
        let labels: Vec<String> = records.iter().map(Record::label).collect();
        // Kuy Teav is unavailable.
        assert_eq!(labels, vec!["Fries", "Zinger Burger", "House Wine"]);
        let Record::MenuItem(first) = &records[0] else { panic!("expected item") };
        assert_eq!(first.restaurant_name.as_deref(), Some("KFC Cambodia"));
    }

    #[tokio::test]
    async fn test_menu_with_name_and_price() {
        let router = router_at(12, 0);
        let records = run(
            &router,
            intent(Target::Menu, json!({"restaurantName": "Luna", "price": {"max": 5}}), 20),
        )
        .await;
        assert!(records.is_empty());
    }

    // ---- Promotions ----

    #[tokio::test]
    async fn test_promotions_active_window() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Promotion, json!({}), 10)).await;
        let labels: Vec<String> = records.iter().map(Record::label).collect();
        assert_eq!(labels, vec!["Bucket Monday", "Wine Week"]);
        let Record::Promotion(p) = &records[1] else { panic!("expected promotion") };
        assert_eq!(p.restaurant_name.as_deref(), Some("Luna Rooftop"));
    }

    #[tokio::test]
    async fn test_promotions_for_restaurant() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Promotion, json!({"restaurantName": "luna rooftop"}), 10)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "Wine Week");
    }

    // ---- Opening hours ----

    #[tokio::test]
    async fn test_hours_sorted_by_day() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::OpeningHours, json!({"restaurantName": "KFC"}), 5)).await;
        let days: Vec<DayOfWeek> = records
            .iter()
            .map(|r| match r {
                Record::OpeningHours(h) => h.hours.day_of_week,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(days, vec![DayOfWeek::Mon, DayOfWeek::Tue]);
    }

    #[tokio::test]
    async fn test_hours_by_day_without_name() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::OpeningHours, json!({"dayOfWeek": "SUN"}), 5)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "Night Owl Noodles");
    }

    // ---- Open now ----

    #[tokio::test]
    async fn test_is_open_now_inside_window() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::IsOpenNow, json!({"restaurantName": "KFC"}), 1)).await;
        let Record::OpenStatus(status) = &records[0] else { panic!("expected status") };
        assert!(status.is_open);
        assert_eq!(status.open_time.as_deref(), Some("09:00"));
        assert_eq!(status.close_time.as_deref(), Some("22:00"));
        assert_eq!(status.current_time, "12:00");
        assert_eq!(status.day, DayOfWeek::Mon);
    }

    #[tokio::test]
    async fn test_is_open_now_outside_window() {
        let router = router_at(23, 15);
        let records = run(&router, intent(Target::IsOpenNow, json!({"restaurantName": "KFC"}), 1)).await;
        let Record::OpenStatus(status) = &records[0] else { panic!("expected status") };
        assert!(!status.is_open);
    }

    #[tokio::test]
    async fn test_is_open_now_without_hours_is_closed() {
        let router = router_at(12, 0);
        let store = MemoryRecordStore::empty();
        store.load(Collection::Restaurants, vec![json!({"id": "z", "name": "Ghost Kitchen"})]);
        let router = QueryRouter::new(Arc::new(store), router.clock.clone(), 7);
        let records = run(&router, intent(Target::IsOpenNow, json!({"restaurantName": "ghost"}), 1)).await;
        let Record::OpenStatus(status) = &records[0] else { panic!("expected status") };
        assert!(!status.is_open);
        assert!(status.open_time.is_none());
    }

    #[tokio::test]
    async fn test_open_now_scan() {
        let router = router_at(23, 30);
        let records = run(&router, intent(Target::OpenNow, json!({}), 10)).await;
        let mut labels: Vec<String> = records.iter().map(Record::label).collect();
        labels.sort();
        assert_eq!(labels, vec!["Luna Rooftop", "Night Owl Noodles"]);
        let Record::Restaurant(view) = &records[0] else { panic!("expected restaurant") };
        assert!(view.today_hours.is_some());
    }

    #[tokio::test]
    async fn test_open_now_intersects_filters() {
        let router = router_at(23, 30);
        let records = run(&router, intent(Target::OpenNow, json!({"cuisine": "Cambodian"}), 10)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "Night Owl Noodles");
    }

    #[tokio::test]
    async fn test_open_at_explicit_time() {
        let router = router_at(3, 0);
        let records = run(&router, intent(Target::OpenAt, json!({"time": "10:00", "day": "TUE"}), 10)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "KFC Cambodia");

        let records = run(&router, intent(Target::OpenAt, json!({"time": "01:00"}), 10)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "Night Owl Noodles");
    }

    // ---- Price tiers ----

    #[tokio::test]
    async fn test_price_tier_lookup() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::PriceTier, json!({"tier": "LUXURY"}), 5)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(), "LUXURY");
        assert_eq!(run(&router, intent(Target::PriceTier, json!({}), 5)).await.len(), 2);
    }

    // ---- Failure isolation ----

    #[tokio::test]
    async fn test_failing_store_marks_each_intent_failed() {
        let router = QueryRouter::new(Arc::new(FailingStore), monday_at(12, 0), 7);
        let plan = QueryPlan {
            intents: vec![
                intent(Target::Restaurant, json!({}), 5),
                intent(Target::PriceTier, json!({}), 5),
            ],
        };
        let results = router.execute(&plan).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(IntentResult::is_failed));
        assert!(results.iter().all(|r| r.records.is_empty()));
    }

    #[tokio::test]
    async fn test_results_capped_at_limit() {
        let router = router_at(12, 0);
        let records = run(&router, intent(Target::Restaurant, json!({}), 2)).await;
        assert_eq!(records.len(), 2);
    }
}
