//! Per-conversation filter memory.
//!
//! A session remembers the filters a user has accumulated (restaurant being
//! discussed, preferred ambience, budget) so that follow-up messages can be
//! interpreted in context. Sessions live in SQLite with a time-to-live and are
//! fronted by a bounded in-process cache.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use dine_core::SessionRecord;
use dine_storage::SessionRepository;

use crate::filter::{filters_from_json, filters_to_json, FilterValue, Filters, Scalar};
use crate::types::Target;

/// Keys worth remembering between turns.
pub const PERSISTED_KEYS: &[&str] = &[
    "restaurantName",
    "cuisine",
    "category",
    "priceTier",
    "ambience",
    "price",
    "hasPrivateRooms",
];

/// A loaded session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub filters: Filters,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn fresh(session_id: &str, ttl: Duration) -> Self {
        Self {
            session_id: session_id.to_string(),
            filters: Filters::new(),
            expires_at: Utc::now() + ttl,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            filters: filters_from_json(&record.filters),
            session_id: record.session_id,
            expires_at: record.expires_at,
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Bounded map of recently used sessions. When full, the entry closest to
/// expiry is evicted.
pub struct SessionCache {
    entries: Mutex<HashMap<String, Session>>,
    capacity: usize,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// A live cached session; expired entries are dropped on sight.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(session_id) {
            Some(s) if s.is_expired(Utc::now()) => {
                entries.remove(session_id);
                None
            }
            Some(s) => Some(s.clone()),
            None => None,
        }
    }

    pub fn put(&self, session: Session) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity && !entries.contains_key(&session.session_id) {
            let victim = entries
                .values()
                .min_by_key(|s| s.expires_at)
                .map(|s| s.session_id.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
            }
        }
        entries.insert(session.session_id.clone(), session);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Merge rules
// =============================================================================

fn union_ambience(old: &FilterValue, new: &FilterValue) -> FilterValue {
    let mut tags: Vec<Scalar> = Vec::new();
    for value in [old, new] {
        let items = match value {
            FilterValue::Set(items) => items.clone(),
            FilterValue::Scalar(s) => vec![s.clone()],
            FilterValue::Text(t) => vec![Scalar::Text(t.clone())],
            FilterValue::Range { .. } => Vec::new(),
        };
        for item in items {
            if !tags.contains(&item) {
                tags.push(item);
            }
        }
    }
    FilterValue::Set(tags)
}

fn intersect_ranges(old: &FilterValue, new: &FilterValue) -> FilterValue {
    let (Some((old_min, old_max)), Some((new_min, new_max))) = (old.bounds(), new.bounds()) else {
        return new.clone();
    };
    let pick = |a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64| match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, b) => a.or(b),
    };
    let min = pick(old_min, new_min, f64::max);
    let max = pick(old_max, new_max, f64::min);
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => new.clone(),
        _ => FilterValue::Range { min, max },
    }
}

/// Combine remembered filters with new ones. New values win, except that
/// ambience tags accumulate and numeric ranges narrow. A range narrowed to
/// nothing is replaced by the new range.
pub fn merge(old: &Filters, new: &Filters) -> Filters {
    let mut merged = old.clone();
    for (key, value) in new {
        let combined = match merged.get(key) {
            Some(previous) if key == "ambience" => union_ambience(previous, value),
            Some(previous) if previous.bounds().is_some() && value.bounds().is_some() => {
                intersect_ranges(previous, value)
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

/// The subset of `filters` worth remembering, with restaurant `name`
/// stored as `restaurantName`.
pub fn persistable(filters: &Filters) -> Filters {
    let mut kept = Filters::new();
    for (key, value) in filters {
        let key = if key == "name" { "restaurantName" } else { key.as_str() };
        if PERSISTED_KEYS.contains(&key) {
            kept.insert(key.to_string(), value.clone());
        }
    }
    kept
}

/// Remembered filters that apply to a new intent of `target`.
pub fn context_for(target: Target, remembered: &Filters) -> Filters {
    let keys: &[&str] = match target {
        Target::Menu | Target::OpeningHours | Target::Promotion | Target::IsOpenNow => {
            &["restaurantName"]
        }
        Target::Restaurant => &["ambience", "cuisine", "priceTier", "price", "hasPrivateRooms"],
        Target::PriceTier | Target::OpenNow | Target::OpenAt => &[],
    };
    keys.iter()
        .filter_map(|k| remembered.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

// =============================================================================
// Store
// =============================================================================

/// Session lookup and persistence. Storage failures never reach the caller:
/// they are logged and the turn continues with in-memory state.
pub struct SessionFilterStore {
    repository: SessionRepository,
    cache: SessionCache,
    ttl: Duration,
}

impl SessionFilterStore {
    pub fn new(repository: SessionRepository, ttl: Duration, cache_capacity: usize) -> Self {
        Self {
            repository,
            cache: SessionCache::new(cache_capacity),
            ttl,
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Load a live session, creating an empty one when it is unknown or
    /// expired.
    pub fn get_or_create(&self, session_id: &str) -> Session {
        if let Some(session) = self.cache.get(session_id) {
            return session;
        }

        let stored = match self.repository.get(session_id) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, session_id, "Failed to load session");
                None
            }
        };

        let session = match stored {
            Some(record) if !record.is_expired(Utc::now()) => {
                if let Err(e) = self.repository.touch(session_id, self.ttl) {
                    warn!(error = %e, session_id, "Failed to refresh session expiry");
                }
                Session::from(record)
            }
            _ => match self.repository.create(session_id, self.ttl) {
                Ok(record) => {
                    debug!(session_id, "Created session");
                    Session::from(record)
                }
                Err(e) => {
                    warn!(error = %e, session_id, "Failed to create session");
                    Session::fresh(session_id, self.ttl)
                }
            },
        };

        self.cache.put(session.clone());
        session
    }

    /// Merge `filters` into the stored session and refresh the cache.
    /// Returns the merged filters.
    pub fn persist(&self, session_id: &str, filters: &Filters) -> Filters {
        let incoming = persistable(filters);
        if incoming.is_empty() {
            return self
                .cache
                .get(session_id)
                .map(|s| s.filters)
                .unwrap_or_default();
        }

        let result = self.repository.update_filters(session_id, self.ttl, |current| {
            filters_to_json(&merge(&filters_from_json(current), &incoming))
        });

        let session = match result {
            Ok(record) => Session::from(record),
            Err(e) => {
                warn!(error = %e, session_id, "Failed to persist session filters");
                let mut session = self
                    .cache
                    .get(session_id)
                    .unwrap_or_else(|| Session::fresh(session_id, self.ttl));
                session.filters = merge(&session.filters, &incoming);
                session
            }
        };
        let merged = session.filters.clone();
        self.cache.put(session);
        merged
    }
}
