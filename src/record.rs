//! Row records and primary-key normalization.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::fmt;

/// Primary keys already present at the sink, fetched once per run.
pub type ExistingKeySet = HashSet<RecordKey>;

/// A primary-key value normalized for comparison across stores.
///
/// SQLite may hand back `5` where PostgREST answers `"5"` (or the other way
/// around for text-affinity columns), so integer-looking values collapse to
/// [`RecordKey::Int`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// Integer key
    Int(i64),
    /// Any other key
    Text(String),
}

impl RecordKey {
    /// Normalize a JSON value into a key. Null, booleans and containers are
    /// not valid keys.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(RecordKey::Int(i));
                }
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Some(RecordKey::Int(f as i64))
                    }
                    _ => Some(RecordKey::Text(n.to_string())),
                }
            }
            JsonValue::String(s) => Some(
                s.trim()
                    .parse::<i64>()
                    .map(RecordKey::Int)
                    .unwrap_or_else(|_| RecordKey::Text(s.clone())),
            ),
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Array(_) | JsonValue::Object(_) => {
                None
            }
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{}", i),
            RecordKey::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One source row: column name to scalar value, in source column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, JsonValue>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a column value, keeping insertion order.
    pub fn insert(&mut self, column: impl Into<String>, value: JsonValue) {
        self.0.insert(column.into(), value);
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract the normalized primary key.
    pub fn key(&self, primary_key: &str) -> Result<RecordKey> {
        let value = self.get(primary_key).ok_or_else(|| {
            Error::schema(format!("record is missing primary key column '{}'", primary_key))
        })?;

        RecordKey::from_json(value).ok_or_else(|| {
            Error::schema(format!(
                "primary key column '{}' has unusable value {}",
                primary_key, value
            ))
        })
    }
}

impl<K: Into<String>> FromIterator<(K, JsonValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
