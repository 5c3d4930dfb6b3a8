use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::constants::SCRAPED_AT_FIELD;

/// A loosely-typed value as produced by a source connector.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
    Absent,
}

static ABSENT: RawValue = RawValue::Absent;

impl RawValue {
    /// Absent, blank text, or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Absent => true,
            RawValue::Text(s) => s.trim().is_empty(),
            RawValue::List(items) => items.is_empty(),
            RawValue::Number(_) | RawValue::Bool(_) => false,
        }
    }

    /// Convert a JSON value into a raw value. Nested objects and nested arrays
    /// have no flat representation and are reported as malformed.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(RawValue::Absent),
            Value::Bool(b) => Ok(RawValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(RawValue::Number)
                .ok_or_else(|| format!("number {} is not representable", n)),
            Value::String(s) => Ok(RawValue::Text(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        Value::Number(n) => out.push(n.to_string()),
                        Value::Bool(b) => out.push(b.to_string()),
                        Value::Null => {}
                        Value::Array(_) | Value::Object(_) => {
                            return Err("list contains a nested structure".to_string())
                        }
                    }
                }
                Ok(RawValue::List(out))
            }
            Value::Object(_) => Err("nested object value".to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<Vec<&str>> for RawValue {
    fn from(value: Vec<&str>) -> Self {
        RawValue::List(value.into_iter().map(str::to_string).collect())
    }
}

/// One unvalidated record from a source, keyed by field name.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Zero-based position within the batch
    pub position: usize,
    /// Per-record scrape time, when the source carries one
    pub scraped_at: Option<DateTime<Utc>>,
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            scraped_at: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<RawValue>) -> Self {
        self.insert(field, value.into());
        self
    }

    pub fn with_scraped_at(mut self, scraped_at: DateTime<Utc>) -> Self {
        self.scraped_at = Some(scraped_at);
        self
    }

    pub fn insert(&mut self, field: &str, value: RawValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<RawValue> {
        self.fields.remove(field)
    }

    /// The value of `field`, or `Absent` when the record does not carry it.
    pub fn get(&self, field: &str) -> &RawValue {
        self.fields.get(field).unwrap_or(&ABSENT)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a JSON object. A `scraped_at` key is lifted into
    /// the record's provenance and never kept as a field; an unparseable
    /// value is dropped.
    pub fn from_json_object(position: usize, object: &Map<String, Value>) -> Result<Self, MalformedInput> {
        let mut record = RawRecord::new(position);
        for (key, value) in object {
            if key == SCRAPED_AT_FIELD {
                record.scraped_at = value.as_str().and_then(parse_timestamp);
                if record.scraped_at.is_none() && !value.is_null() {
                    warn!(position, "Dropping unparseable record scraped_at {}", value);
                }
                continue;
            }
            let raw = RawValue::from_json(value).map_err(|detail| MalformedInput {
                position,
                detail: format!("field '{}': {}", key, detail),
            })?;
            record.insert(key, raw);
        }
        Ok(record)
    }
}

/// Naive forms are taken as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` with either separator and
/// optional fractional seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// A batch entry that could not be read as a flat record.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedInput {
    pub position: usize,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawEntry {
    Record(RawRecord),
    Malformed(MalformedInput),
}

impl From<RawRecord> for RawEntry {
    fn from(record: RawRecord) -> Self {
        RawEntry::Record(record)
    }
}

/// Where a batch came from and when it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub origin: String,
    pub fetched_at: DateTime<Utc>,
}

impl SourceMetadata {
    pub fn new(origin: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            origin: origin.into(),
            fetched_at,
        }
    }
}

/// The loader's output: ordered entries plus source metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub source: SourceMetadata,
    pub entries: Vec<RawEntry>,
}

impl RawBatch {
    pub fn new(source: SourceMetadata, entries: Vec<RawEntry>) -> Self {
        Self { source, entries }
    }

    pub fn from_records(source: SourceMetadata, records: Vec<RawRecord>) -> Self {
        Self {
            source,
            entries: records.into_iter().map(RawEntry::Record).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
