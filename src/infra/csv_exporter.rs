use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::app::ports::{ExportPort, ExportSummary};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::dedupe::IdentityKey;
use crate::pipeline::tabular;
use crate::pipeline::RunReport;

/// Writes the flattened tabular form to `<dir>/<domain>_processed.csv`
pub struct CsvFileExporter {
    dir: PathBuf,
}

impl CsvFileExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{}_processed.csv", domain))
    }

    pub fn render(report: &RunReport) -> Result<Vec<u8>> {
        let (headers, rows) = tabular::flatten(&report.records);
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&headers)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| EtlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

#[async_trait]
impl ExportPort for CsvFileExporter {
    fn format(&self) -> &'static str {
        "csv"
    }

    async fn export(&self, report: &RunReport, _key: Option<&IdentityKey>) -> Result<ExportSummary> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&report.stats.domain);
        tokio::fs::write(&path, Self::render(report)?).await?;
        debug!("Wrote {}", path.display());

        Ok(ExportSummary {
            format: self.format(),
            target: path.display().to_string(),
            written: report.records.len(),
            unchanged: 0,
        })
    }
}
