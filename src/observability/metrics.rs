//! Metrics for the ETL pipeline
//!
//! Names follow the Prometheus conventions. Recording functions are grouped
//! by pipeline phase; without an installed recorder they are no-ops.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Every metric name used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Source metrics
    SourcesLoadsSuccess,
    SourcesLoadsError,
    SourcesPayloadBytes,
    SourcesFetchDuration,

    // Validate metrics
    ValidateRecordsAccepted,
    ValidateRecordsAcceptedWithDefault,
    ValidateRecordsRejected,
    ValidateDefaultsSubstituted,

    // Enrich / dedupe metrics
    EnrichRecordsEnriched,
    DedupeDuplicatesRemoved,

    // Pipeline metrics
    PipelineRunsCompleted,
    PipelineRunsFailed,
    PipelineRunDuration,

    // Export metrics
    ExportRecordsWritten,
    ExportErrors,
    StoreRowsInserted,
    StoreRowsUpdated,
    StoreRowsUnchanged,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourcesLoadsSuccess => "etl_sources_loads_success_total",
            MetricName::SourcesLoadsError => "etl_sources_loads_error_total",
            MetricName::SourcesPayloadBytes => "etl_sources_payload_bytes",
            MetricName::SourcesFetchDuration => "etl_sources_fetch_duration_seconds",

            MetricName::ValidateRecordsAccepted => "etl_validate_records_accepted_total",
            MetricName::ValidateRecordsAcceptedWithDefault => "etl_validate_records_accepted_with_default_total",
            MetricName::ValidateRecordsRejected => "etl_validate_records_rejected_total",
            MetricName::ValidateDefaultsSubstituted => "etl_validate_defaults_substituted_total",

            MetricName::EnrichRecordsEnriched => "etl_enrich_records_enriched_total",
            MetricName::DedupeDuplicatesRemoved => "etl_dedupe_duplicates_removed_total",

            MetricName::PipelineRunsCompleted => "etl_pipeline_runs_completed_total",
            MetricName::PipelineRunsFailed => "etl_pipeline_runs_failed_total",
            MetricName::PipelineRunDuration => "etl_pipeline_run_duration_seconds",

            MetricName::ExportRecordsWritten => "etl_export_records_written_total",
            MetricName::ExportErrors => "etl_export_errors_total",
            MetricName::StoreRowsInserted => "etl_store_rows_inserted_total",
            MetricName::StoreRowsUpdated => "etl_store_rows_updated_total",
            MetricName::StoreRowsUnchanged => "etl_store_rows_unchanged_total",
        }
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init() -> Result<(), String> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Prometheus exposition text, if the recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Source Metrics
// ============================================================================

pub mod sources {
    use super::MetricName;

    pub fn load_success(origin: &str, bytes: usize) {
        ::metrics::counter!(MetricName::SourcesLoadsSuccess.as_str(), "origin" => origin.to_string()).increment(1);
        ::metrics::histogram!(MetricName::SourcesPayloadBytes.as_str(), "origin" => origin.to_string())
            .record(bytes as f64);
    }

    pub fn load_error(origin: &str) {
        ::metrics::counter!(MetricName::SourcesLoadsError.as_str(), "origin" => origin.to_string()).increment(1);
    }

    pub fn fetch_duration(secs: f64) {
        ::metrics::histogram!(MetricName::SourcesFetchDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Validate Metrics
// ============================================================================

pub mod validate {
    use super::MetricName;
    use crate::pipeline::processing::validate::ValidationOutcome;

    pub fn record_outcome(outcome: &ValidationOutcome) {
        match outcome {
            ValidationOutcome::Accepted(_) => {
                ::metrics::counter!(MetricName::ValidateRecordsAccepted.as_str()).increment(1);
            }
            ValidationOutcome::AcceptedWithDefault(_, subs) => {
                ::metrics::counter!(MetricName::ValidateRecordsAcceptedWithDefault.as_str()).increment(1);
                for sub in subs {
                    ::metrics::counter!(MetricName::ValidateDefaultsSubstituted.as_str(), "field" => sub.field.clone())
                        .increment(1);
                }
            }
            ValidationOutcome::Rejected(reason) => {
                ::metrics::counter!(MetricName::ValidateRecordsRejected.as_str(), "reason" => reason.to_string())
                    .increment(1);
            }
        }
    }
}

// ============================================================================
// Enrich / Dedupe Metrics
// ============================================================================

pub mod enrich {
    use super::MetricName;

    pub fn record_enriched() {
        ::metrics::counter!(MetricName::EnrichRecordsEnriched.as_str()).increment(1);
    }
}

pub mod dedupe {
    use super::MetricName;

    pub fn duplicates_removed(count: usize) {
        ::metrics::counter!(MetricName::DedupeDuplicatesRemoved.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

pub mod pipeline {
    use super::MetricName;

    pub fn run_completed(domain: &str, secs: f64) {
        ::metrics::counter!(MetricName::PipelineRunsCompleted.as_str(), "domain" => domain.to_string()).increment(1);
        ::metrics::histogram!(MetricName::PipelineRunDuration.as_str(), "domain" => domain.to_string()).record(secs);
    }

    pub fn run_failed(domain: &str) {
        ::metrics::counter!(MetricName::PipelineRunsFailed.as_str(), "domain" => domain.to_string()).increment(1);
    }
}

// ============================================================================
// Export Metrics
// ============================================================================

pub mod export {
    use super::MetricName;

    pub fn records_written(format: &str, count: usize) {
        ::metrics::counter!(MetricName::ExportRecordsWritten.as_str(), "format" => format.to_string())
            .increment(count as u64);
    }

    pub fn error(format: &str) {
        ::metrics::counter!(MetricName::ExportErrors.as_str(), "format" => format.to_string()).increment(1);
    }

    pub fn store_rows(inserted: usize, updated: usize, unchanged: usize) {
        ::metrics::counter!(MetricName::StoreRowsInserted.as_str()).increment(inserted as u64);
        ::metrics::counter!(MetricName::StoreRowsUpdated.as_str()).increment(updated as u64);
        ::metrics::counter!(MetricName::StoreRowsUnchanged.as_str()).increment(unchanged as u64);
    }
}
