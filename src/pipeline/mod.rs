// Transformation pipeline: ingestion, processing stages and run orchestration

pub mod clock;
pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod stats;
pub mod tabular;

pub use orchestrator::{Pipeline, PipelineBuilder, Run, RunReport};
pub use stats::{RunStatistics, StatsCollector};
