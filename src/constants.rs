/// Delimiter used when list-valued fields are flattened into a single cell.
/// Occurrences inside an element are escaped with `ESCAPE_CHAR`.
pub const LIST_DELIMITER: char = '|';
pub const ESCAPE_CHAR: char = '\\';

/// Separator between the components of a multi-field identity key.
pub const IDENTITY_SEPARATOR: char = '\u{1f}';

// Rejection reason labels
pub const MISSING_FIELD: &str = "missing-field";
pub const INVALID_TYPE: &str = "invalid-type";
pub const OUT_OF_RANGE: &str = "out-of-range";
pub const MALFORMED_INPUT: &str = "malformed-input";

/// Label used by classification rules when no configured label matches.
pub const DEFAULT_FALLBACK_LABEL: &str = "other";

// Provenance columns appended to every exported record
pub const DATA_SOURCE_FIELD: &str = "data_source";
pub const SCRAPED_AT_FIELD: &str = "scraped_at";
pub const PROCESSED_AT_FIELD: &str = "processed_at";

// Default locations, overridable through config.toml or the environment
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_RAW_DIR: &str = "data/raw";
pub const DEFAULT_PROCESSED_DIR: &str = "data/processed";
pub const DEFAULT_LOG_DIR: &str = "data/logs";
pub const DEFAULT_DATABASE: &str = "data/healthai.db";
pub const DEFAULT_LOG_LEVEL: &str = "healthai_etl=info";
