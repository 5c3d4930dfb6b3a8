use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::debug;

use crate::app::ports::{ExportPort, ExportSummary};
use crate::domain::canonical::format_timestamp;
use crate::error::Result;
use crate::pipeline::processing::dedupe::IdentityKey;
use crate::pipeline::RunReport;

/// Writes `{metadata: {..., processing_stats}, <records_key>: [...]}` to
/// `<dir>/<domain>_processed.json`
pub struct JsonFileExporter {
    dir: PathBuf,
    records_key: Option<String>,
}

impl JsonFileExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            records_key: None,
        }
    }

    /// Array key for the records. Defaults to the domain name.
    pub fn with_records_key(mut self, key: &str) -> Self {
        self.records_key = Some(key.to_string());
        self
    }

    pub fn path_for(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{}_processed.json", domain))
    }

    pub fn document(&self, report: &RunReport) -> Result<Value> {
        let stats = &report.stats;
        let metadata = json!({
            "domain": stats.domain,
            "data_source": stats.origin,
            "run_id": stats.run_id.to_string(),
            "processed_at": stats.completed_at.as_ref().map(format_timestamp),
            "total_records": report.records.len(),
            "processing_stats": serde_json::to_value(stats)?,
        });

        let key = self.records_key.clone().unwrap_or_else(|| stats.domain.clone());
        let mut document = Map::new();
        document.insert("metadata".to_string(), metadata);
        document.insert(key, serde_json::to_value(&report.records)?);
        Ok(Value::Object(document))
    }
}

#[async_trait]
impl ExportPort for JsonFileExporter {
    fn format(&self) -> &'static str {
        "json"
    }

    async fn export(&self, report: &RunReport, _key: Option<&IdentityKey>) -> Result<ExportSummary> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&report.stats.domain);
        let body = serde_json::to_vec_pretty(&self.document(report)?)?;
        tokio::fs::write(&path, body).await?;
        debug!("Wrote {}", path.display());

        Ok(ExportSummary {
            format: self.format(),
            target: path.display().to_string(),
            written: report.records.len(),
            unchanged: 0,
        })
    }
}
