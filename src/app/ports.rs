use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SourceError};
use crate::pipeline::processing::dedupe::IdentityKey;
use crate::pipeline::RunReport;

/// Bytes read from a source and when they were obtained
#[derive(Debug, Clone)]
pub struct SourcePayload {
    pub bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// Where raw payloads come from
#[async_trait]
pub trait SourcePort: Send + Sync {
    async fn read(&self) -> std::result::Result<SourcePayload, SourceError>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// What one exporter did with a run's records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub format: &'static str,
    pub target: String,
    /// Records written or rewritten
    pub written: usize,
    /// Records whose stored content was already identical
    pub unchanged: usize,
}

/// Where canonical records go
#[async_trait]
pub trait ExportPort: Send + Sync {
    fn format(&self) -> &'static str;

    /// Persist a run. `key` is the pipeline's primary identity key, if any.
    async fn export(&self, report: &RunReport, key: Option<&IdentityKey>) -> Result<ExportSummary>;
}
