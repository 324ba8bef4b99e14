//! Typed filter values.
//!
//! Filters arrive as loose JSON (keyword rules, model output, stored
//! sessions). They are parsed once into [`FilterValue`] and anything with an
//! unsupported shape is dropped, so retrieval only ever sees valid filters.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Filter key to value, ordered for stable wire output.
pub type Filters = BTreeMap<String, FilterValue>;

/// A single scalar filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => number_json(*n),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Whole numbers serialize as integers so stored filters stay readable.
fn number_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// A structurally valid filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    /// Set membership, e.g. ambience tags.
    Set(Vec<Scalar>),
    /// Inclusive numeric bounds; at least one is present.
    Range { min: Option<f64>, max: Option<f64> },
    /// Free-text pattern, `{"$regex": "..."}` on the wire.
    Text(String),
}

impl FilterValue {
    pub fn text(s: impl Into<String>) -> Self {
        FilterValue::Scalar(Scalar::Text(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        FilterValue::Scalar(Scalar::Bool(b))
    }

    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Set(items.into_iter().map(|s| Scalar::Text(s.into())).collect())
    }

    pub fn max(max: f64) -> Self {
        FilterValue::Range {
            min: None,
            max: Some(max),
        }
    }

    /// Parse a loose JSON value. Returns `None` for null, empty or nested
    /// arrays, and objects that are neither a pattern nor bounds.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(items) => {
                let scalars: Vec<Scalar> = items.iter().filter_map(Scalar::from_json).collect();
                (!scalars.is_empty()).then_some(FilterValue::Set(scalars))
            }
            Value::Object(map) => Self::from_object(map),
            scalar => Scalar::from_json(scalar).map(FilterValue::Scalar),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Option<Self> {
        if let Some(pattern) = map.get("$regex").and_then(Value::as_str) {
            let pattern = pattern.trim();
            return (!pattern.is_empty()).then(|| FilterValue::Text(pattern.to_string()));
        }

        let bound = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| map.get(*k))
                .find_map(|v| v.as_f64().or_else(|| v.as_str()?.trim().parse().ok()))
        };
        let min = bound(&["min", "$gte", "gte"]);
        let max = bound(&["max", "$lte", "lte"]);
        if min.is_none() && max.is_none() {
            return None;
        }
        Some(FilterValue::Range { min, max })
    }

    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Scalar(s) => s.to_json(),
            FilterValue::Set(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            FilterValue::Range { min, max } => {
                let mut map = Map::new();
                if let Some(min) = min {
                    map.insert("min".to_string(), number_json(*min));
                }
                if let Some(max) = max {
                    map.insert("max".to_string(), number_json(*max));
                }
                Value::Object(map)
            }
            FilterValue::Text(pattern) => {
                let mut map = Map::new();
                map.insert("$regex".to_string(), Value::String(pattern.clone()));
                Value::Object(map)
            }
        }
    }

    /// The value as a single string: a text scalar or a text pattern.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::Scalar(s) => s.as_str(),
            FilterValue::Text(p) => Some(p),
            _ => None,
        }
    }

    /// Truthiness for flag filters; accepts `"true"`/`"false"` strings.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FilterValue::Scalar(Scalar::Bool(b)) => Some(*b),
            FilterValue::Scalar(Scalar::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Scalar(Scalar::Number(n)) => Some(*n),
            FilterValue::Scalar(Scalar::Text(s)) => s.trim().trim_start_matches('$').parse().ok(),
            _ => None,
        }
    }

    /// Every string carried by the value, in order.
    pub fn strings(&self) -> Vec<String> {
        match self {
            FilterValue::Scalar(Scalar::Text(s)) | FilterValue::Text(s) => vec![s.clone()],
            FilterValue::Set(items) => items
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn bounds(&self) -> Option<(Option<f64>, Option<f64>)> {
        match self {
            FilterValue::Range { min, max } => Some((*min, *max)),
            _ => None,
        }
    }
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FilterValue::from_json(&value).ok_or_else(|| D::Error::custom("unsupported filter shape"))
    }
}

/// Parse a JSON object into filters, dropping invalid entries. Anything
/// other than an object yields no filters.
pub fn filters_from_json(value: &Value) -> Filters {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| FilterValue::from_json(v).map(|fv| (k.clone(), fv)))
            .collect(),
        _ => Filters::new(),
    }
}

pub fn filters_to_json(filters: &Filters) -> Value {
    Value::Object(
        filters
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}
