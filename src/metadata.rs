//! Metadata snapshots
//!
//! A snapshot is the per-source aggregate the engine consumes: a flat JSON object
//! of counters and timestamps for one user over a recent window. Snapshots are
//! produced outside the engine (see [`crate::sources`]) and never mutated by it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SignalError;

/// ISO 8601 layouts with an explicit offset that RFC 3339 rejects (no seconds, space separator)
const OFFSET_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M%:z",
];

/// Naive ISO 8601 layouts accepted for timestamps without an offset
const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Source-specific counters for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataSnapshot {
    fields: Map<String, Value>,
}

impl MetadataSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Whether `key` is present with a non-null value
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.fields.get(key), Some(v) if !v.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Read a numeric counter. Missing or null counters read as 0.
    pub fn count(&self, key: &str) -> Result<f64, SignalError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(0.0),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| SignalError::InvalidField {
                field: key.to_string(),
                found: n.to_string(),
            }),
            Some(other) => Err(SignalError::InvalidField {
                field: key.to_string(),
                found: json_type_name(other).to_string(),
            }),
        }
    }

    /// Read the hour of day of a timestamp field.
    ///
    /// Strings are ISO 8601 and the hour is taken in whatever offset the string
    /// encodes. Numbers are Unix seconds read as UTC. Missing, null, empty or zero
    /// values yield `None`.
    pub fn timestamp_hour(&self, key: &str) -> Result<Option<u32>, SignalError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => parse_iso_hour(s).map(Some).ok_or_else(|| {
                SignalError::TimestampParse {
                    field: key.to_string(),
                    value: s.clone(),
                }
            }),
            Some(Value::Number(n)) => {
                let secs = n.as_f64().unwrap_or(0.0);
                if secs == 0.0 {
                    return Ok(None);
                }
                DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)
                    .map(|dt| Some(dt.hour()))
                    .ok_or_else(|| SignalError::TimestampParse {
                        field: key.to_string(),
                        value: n.to_string(),
                    })
            }
            Some(other) => Err(SignalError::InvalidField {
                field: key.to_string(),
                found: json_type_name(other).to_string(),
            }),
        }
    }
}

impl From<Map<String, Value>> for MetadataSnapshot {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn parse_iso_hour(s: &str) -> Option<u32> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.hour());
    }
    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.hour());
        }
    }
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.hour());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|_| 0)
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
