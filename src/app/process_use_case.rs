use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::app::ports::{ExportPort, ExportSummary, SourcePort};
use crate::observability::metrics;
use crate::pipeline::ingestion::{self, SourceSettings};
use crate::pipeline::{Pipeline, RunStatistics};

/// Result of processing one domain end to end
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub stats: RunStatistics,
    pub exports: Vec<ExportSummary>,
}

/// Use case for reading a source, running it through the pipeline and
/// handing the result to every configured exporter
pub struct ProcessUseCase {
    pipeline: Arc<Pipeline>,
    source: Box<dyn SourcePort>,
    settings: SourceSettings,
    exporters: Vec<Box<dyn ExportPort>>,
}

impl ProcessUseCase {
    pub fn new(
        pipeline: Arc<Pipeline>,
        source: Box<dyn SourcePort>,
        settings: SourceSettings,
        exporters: Vec<Box<dyn ExportPort>>,
    ) -> Self {
        Self {
            pipeline,
            source,
            settings,
            exporters,
        }
    }

    #[instrument(skip(self), fields(domain = %self.pipeline.domain()))]
    pub async fn execute(&self) -> Result<ProcessOutcome> {
        let origin = self.settings.origin.clone();
        info!("Reading {}", self.source.describe());

        let payload = match self.source.read().await {
            Ok(payload) => payload,
            Err(e) => {
                metrics::sources::load_error(&origin);
                return Err(e).context(format!("Failed to read source for '{}'", self.pipeline.domain()));
            }
        };
        let bytes = payload.bytes.len();

        let batch = match ingestion::load(&payload.bytes, &self.settings, payload.fetched_at) {
            Ok(batch) => batch,
            Err(e) => {
                metrics::sources::load_error(&origin);
                return Err(e.into());
            }
        };
        metrics::sources::load_success(&origin, bytes);
        info!("Loaded {} entries ({} bytes)", batch.len(), bytes);

        // CPU-bound; keep it off the async worker threads
        let pipeline = Arc::clone(&self.pipeline);
        let report = tokio::task::spawn_blocking(move || pipeline.run(batch))
            .await
            .context("Pipeline task panicked")??;

        let mut exports = Vec::with_capacity(self.exporters.len());
        for exporter in &self.exporters {
            match exporter.export(&report, self.pipeline.primary_key()).await {
                Ok(summary) => {
                    metrics::export::records_written(summary.format, summary.written);
                    info!(
                        "Exported {} records to {} ({} unchanged)",
                        summary.written, summary.target, summary.unchanged
                    );
                    exports.push(summary);
                }
                Err(e) => {
                    metrics::export::error(exporter.format());
                    error!("{} export failed: {}", exporter.format(), e);
                    return Err(e.into());
                }
            }
        }

        Ok(ProcessOutcome {
            stats: report.stats,
            exports,
        })
    }
}
