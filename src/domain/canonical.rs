use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

use crate::constants::{DATA_SOURCE_FIELD, PROCESSED_AT_FIELD, SCRAPED_AT_FIELD};
use crate::pipeline::tabular;

/// A fully-typed field value of a canonical record.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
}

impl CanonicalValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CanonicalValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CanonicalValue::Integer(i) => Some(*i as f64),
            CanonicalValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            CanonicalValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CanonicalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Single-cell rendering used by the flattened tabular export.
    pub fn to_cell(&self) -> String {
        match self {
            CanonicalValue::List(items) => tabular::join_list(items),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalValue::Text(s) => write!(f, "{}", s),
            CanonicalValue::Integer(i) => write!(f, "{}", i),
            CanonicalValue::Number(n) => write!(f, "{}", n),
            CanonicalValue::Bool(b) => write!(f, "{}", b),
            CanonicalValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CanonicalValue::Text(s) => serializer.serialize_str(s),
            CanonicalValue::Integer(i) => serializer.serialize_i64(*i),
            CanonicalValue::Number(n) => serializer.serialize_f64(*n),
            CanonicalValue::Bool(b) => serializer.serialize_bool(*b),
            CanonicalValue::List(items) => items.serialize(serializer),
        }
    }
}

/// Lineage attributes carried by every canonical record
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub data_source: String,
    pub scraped_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

/// A validated, normalized and enriched record.
///
/// Field order is insertion order: validated fields first, enrichment
/// outputs appended after them.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    fields: Vec<(String, CanonicalValue)>,
    pub provenance: Provenance,
}

impl CanonicalRecord {
    pub fn new(fields: Vec<(String, CanonicalValue)>, provenance: Provenance) -> Self {
        Self { fields, provenance }
    }

    pub fn get(&self, field: &str) -> Option<&CanonicalValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &CanonicalValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Same fields and values, ignoring provenance timestamps.
    pub fn same_content(&self, other: &CanonicalRecord) -> bool {
        self.fields == other.fields && self.provenance.data_source == other.provenance.data_source
    }
}

/// Names reserved for the provenance columns of an export.
pub fn is_provenance_field(name: &str) -> bool {
    matches!(name, DATA_SOURCE_FIELD | SCRAPED_AT_FIELD | PROCESSED_AT_FIELD)
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Serialize for CanonicalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        let fields = self.fields.iter().filter(|(k, _)| !is_provenance_field(k));
        for (key, value) in fields {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(DATA_SOURCE_FIELD, &self.provenance.data_source)?;
        map.serialize_entry(SCRAPED_AT_FIELD, &format_timestamp(&self.provenance.scraped_at))?;
        map.serialize_entry(PROCESSED_AT_FIELD, &format_timestamp(&self.provenance.processed_at))?;
        map.end()
    }
}
