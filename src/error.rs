use thiserror::Error;

/// Problems found while compiling field or enrichment rules.
///
/// These are raised when a pipeline is built, before any record is looked at.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("field '{field}' restricts values but declares no default")]
    MissingDefault { field: String },

    #[error("default '{default}' for field '{field}' is not one of its allowed values")]
    DefaultNotAllowed { field: String, default: String },

    #[error("field '{field}' has an invalid range: {detail}")]
    InvalidRange { field: String, detail: String },

    #[error("rule '{rule}' references unknown field '{field}'")]
    UnknownField { rule: String, field: String },

    #[error("output '{0}' is produced by more than one enrichment rule")]
    DuplicateOutput(String),

    #[error("enrichment output '{0}' shadows a validated field")]
    ShadowedField(String),

    #[error("circular dependency between enrichment rules: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("identity field '{0}' must be a required field")]
    IdentityFieldNotRequired(String),

    #[error("invalid rule '{rule}': {detail}")]
    InvalidRule { rule: String, detail: String },
}

/// Failures of the record source as a whole, as opposed to individual bad rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("source '{origin}' produced no records")]
    Empty { origin: String },

    #[error("source '{origin}' could not be read: {detail}")]
    Unreadable { origin: String, detail: String },
}

/// Failures that stop a pipeline run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// True when the whole source was unavailable, which callers may retry.
    pub fn is_source_failure(&self) -> bool {
        matches!(self, EtlError::Source(_) | EtlError::Pipeline(PipelineError::Source(_)))
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
