//! Documents and the structured filters used to query collections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::Time;

/// A document held in a collection.
///
/// Documents are free-form JSON objects; brands, trials, regulatory events,
/// patents and alerts all share this shape and differ only in their fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Look up a field. Dotted paths (`sponsor.name`) descend into objects.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(field) {
            return Some(value);
        }
        let mut parts = field.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Whether the field is present and non-empty.
    pub fn has_value(&self, field: &str) -> bool {
        self.get(field).is_some_and(|v| !is_empty_value(v))
    }

    /// A non-empty string field.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Render a scalar field as a key string (strings, numbers and booleans).
    pub fn key_text(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Parse a timestamp field.
    pub fn timestamp(&self, field: &str) -> Option<Time> {
        self.get(field).and_then(parse_timestamp)
    }

    /// Numeric field value.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Null, blank strings, and empty arrays or objects count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Parse RFC 3339, naive ISO-8601 (assumed UTC), plain dates, or epoch millis.
pub fn parse_timestamp(value: &Value) -> Option<Time> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Lower-cased alphanumeric tokens, used for `match`-style filters.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Bound of a range filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    /// A point in time
    Time(Time),
    /// A plain number
    Number(f64),
}

/// A structured predicate over documents.
///
/// Collections evaluate filters natively (a search index translates them to
/// its query language); [`Filter::matches`] is the reference semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Filter {
    /// Field is present and non-empty
    Exists {
        /// Field name
        field: String,
    },
    /// Field is absent or empty
    Missing {
        /// Field name
        field: String,
    },
    /// Field equals the value (or, for arrays, contains it)
    Term {
        /// Field name
        field: String,
        /// Expected value
        value: Value,
    },
    /// Field shares at least one case-insensitive token with the text
    Matches {
        /// Field name
        field: String,
        /// Free text
        text: String,
    },
    /// Field lies in `[gte, lt)`; either end may be open
    Range {
        /// Field name
        field: String,
        /// Inclusive lower bound
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<Bound>,
        /// Exclusive upper bound
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<Bound>,
    },
    /// Every sub-filter matches
    All {
        /// Sub-filters
        filters: Vec<Filter>,
    },
    /// At least one sub-filter matches
    Any {
        /// Sub-filters
        filters: Vec<Filter>,
    },
}

impl Filter {
    /// Field existence.
    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Exists { field: field.into() }
    }

    /// Exact equality.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Term { field: field.into(), value: value.into() }
    }

    /// Full-text style token match.
    pub fn matches_text(field: impl Into<String>, text: impl Into<String>) -> Self {
        Filter::Matches { field: field.into(), text: text.into() }
    }

    /// Timestamp at or after `since`.
    pub fn since(field: impl Into<String>, since: Time) -> Self {
        Filter::Range {
            field: field.into(),
            gte: Some(Bound::Time(since)),
            lt: None,
        }
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Exists { field } => doc.has_value(field),
            Filter::Missing { field } => !doc.has_value(field),
            Filter::Term { field, value } => match doc.get(field) {
                Some(Value::Array(items)) => items.iter().any(|item| item == value),
                Some(actual) => actual == value,
                None => false,
            },
            Filter::Matches { field, text } => {
                let wanted: Vec<String> = tokens(text).collect();
                if wanted.is_empty() {
                    return false;
                }
                let hit = |s: &str| tokens(s).any(|t| wanted.contains(&t));
                match doc.get(field) {
                    Some(Value::String(s)) => hit(s),
                    Some(Value::Array(items)) => {
                        items.iter().filter_map(Value::as_str).any(hit)
                    }
                    _ => false,
                }
            }
            Filter::Range { field, gte, lt } => {
                let Some(value) = doc.get(field) else {
                    return false;
                };
                let lower = gte.as_ref().map_or(true, |b| compare(value, b).is_some_and(|o| o.is_ge()));
                let upper = lt.as_ref().map_or(true, |b| compare(value, b).is_some_and(|o| o.is_lt()));
                lower && upper
            }
            Filter::All { filters } => filters.iter().all(|f| f.matches(doc)),
            Filter::Any { filters } => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn compare(value: &Value, bound: &Bound) -> Option<std::cmp::Ordering> {
    match bound {
        Bound::Time(t) => parse_timestamp(value).map(|v| v.cmp(t)),
        Bound::Number(n) => value.as_f64().and_then(|v| v.partial_cmp(n)),
    }
}
