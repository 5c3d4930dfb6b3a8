// Pipeline ingestion: turning source payloads into raw batches

pub mod loader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RawBatch;
use crate::error::SourceError;

pub use loader::{load_csv, load_json, normalize_header};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    Json,
    Csv,
}

fn default_delimiter() -> char {
    ','
}

/// How to find and read a domain's source payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Name recorded as `data_source` on every output record
    pub origin: String,
    #[serde(default)]
    pub format: SourceFormat,
    /// File name under the raw data directory
    #[serde(default)]
    pub file: Option<String>,
    /// Remote snapshot location used by `fetch`
    #[serde(default)]
    pub url: Option<String>,
    /// Key of the records array when the JSON payload is an object
    #[serde(default)]
    pub records_key: Option<String>,
    /// Lower-case CSV headers and replace spaces with underscores
    #[serde(default)]
    pub normalize_headers: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl SourceSettings {
    pub fn new(origin: &str, format: SourceFormat) -> Self {
        Self {
            origin: origin.to_string(),
            format,
            file: None,
            url: None,
            records_key: None,
            normalize_headers: false,
            delimiter: default_delimiter(),
        }
    }
}

/// Decode a payload according to `settings`
pub fn load(bytes: &[u8], settings: &SourceSettings, fetched_at: DateTime<Utc>) -> Result<RawBatch, SourceError> {
    match settings.format {
        SourceFormat::Json => load_json(bytes, &settings.origin, settings.records_key.as_deref(), fetched_at),
        SourceFormat::Csv => load_csv(bytes, settings, fetched_at),
    }
}
