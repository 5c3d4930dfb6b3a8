pub mod constants;
pub mod error;

// Domain data shapes shared across layers
pub mod domain;

// The transformation engine
pub mod pipeline;

pub mod config;
pub mod observability;

// Application and infrastructure boundaries
pub mod app;
pub mod infra;

pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, RunReport, RunStatistics};
