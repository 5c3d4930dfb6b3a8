use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_DATABASE, DEFAULT_LOG_DIR, DEFAULT_LOG_LEVEL, DEFAULT_PROCESSED_DIR, DEFAULT_RAW_DIR,
};
use crate::error::{ConfigError, EtlError, Result};
use crate::pipeline::ingestion::SourceSettings;
use crate::pipeline::processing::enrich::EnrichRuleSpec;
use crate::pipeline::processing::validate::{CaseRule, FieldRuleSpec};
use crate::pipeline::Pipeline;

/// Application settings from `config.toml`, with environment overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub domains: Vec<DomainEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RAW_DIR)
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PROCESSED_DIR)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE)
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            processed_dir: default_processed_dir(),
            log_dir: default_log_dir(),
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// The level as an `EnvFilter` directive. A bare level such as `DEBUG`
    /// applies to this crate only.
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("healthai_etl={}", level.to_lowercase())
        }
    }
}

/// A record domain and the file holding its rules
#[derive(Debug, Clone, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    pub file: PathBuf,
}

impl AppConfig {
    /// Load `config.toml` from the working directory (defaults if it does
    /// not exist), then apply `.env` and environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Like [`load`](Self::load), reading `path` instead of `config.toml`.
    pub fn load_with(path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EtlError::Settings(format!("Failed to read config file '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `RAW_DATA_PATH`, `PROCESSED_DATA_PATH`, `LOG_LEVEL` and
    /// `HEALTHAI_DB_PATH`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("RAW_DATA_PATH") {
            self.paths.raw_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("PROCESSED_DATA_PATH") {
            self.paths.processed_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(db) = lookup("HEALTHAI_DB_PATH") {
            self.paths.database = PathBuf::from(db);
        }
    }

    pub fn domain(&self, name: &str) -> Option<&DomainEntry> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn domain_names(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.name.clone()).collect()
    }

    pub fn load_domain(&self, name: &str) -> Result<DomainConfig> {
        let entry = self
            .domain(name)
            .ok_or_else(|| EtlError::Settings(format!("Unknown domain '{}'", name)))?;
        DomainConfig::load(&entry.file)
    }

    /// Where a domain's raw payload lives, unless overridden on the command line
    pub fn raw_path(&self, domain: &DomainConfig) -> Option<PathBuf> {
        domain.source.file.as_ref().map(|f| self.paths.raw_dir.join(f))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizeSettings {
    /// Case handling for fields the rule set does not declare
    #[serde(default)]
    pub passthrough_case: CaseRule,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentitySettings {
    /// Identity keys in pass order. The first is the primary key.
    #[serde(default)]
    pub keys: Vec<Vec<String>>,
}

/// Everything needed to process one record domain
#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    pub source: SourceSettings,
    #[serde(default)]
    pub normalize: NormalizeSettings,
    #[serde(default)]
    pub fields: Vec<FieldRuleSpec>,
    #[serde(default)]
    pub enrich: Vec<EnrichRuleSpec>,
    #[serde(default)]
    pub identity: IdentitySettings,
}

impl DomainConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EtlError::Settings(format!("Failed to read domain file '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Compile this domain's rules into a pipeline
    pub fn build_pipeline(&self, domain: &str) -> std::result::Result<Pipeline, ConfigError> {
        Pipeline::builder(domain)
            .fields(self.fields.clone())
            .enrich(self.enrich.clone())
            .identity_keys(self.identity.keys.clone())
            .passthrough_case(self.normalize.passthrough_case)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.paths.raw_dir, PathBuf::from(DEFAULT_RAW_DIR));
        assert_eq!(config.logging.level, DEFAULT_LOG_LEVEL);
        assert!(config.domains.is_empty());
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = AppConfig::from_toml_str(
            r#"
            [paths]
            raw_dir = "raw"

            [[domains]]
            name = "exercises"
            file = "config/domains/exercises.toml"
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [("PROCESSED_DATA_PATH", "/tmp/out"), ("LOG_LEVEL", "DEBUG")]
            .into_iter()
            .collect();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.paths.raw_dir, PathBuf::from("raw"));
        assert_eq!(config.paths.processed_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.logging.filter_directive(), "healthai_etl=debug");
        assert_eq!(config.domain_names(), vec!["exercises".to_string()]);
    }

    #[test]
    fn test_domain_config_parses_rule_kinds() {
        let domain = DomainConfig::from_toml_str(
            r#"
            [source]
            origin = "ExerciseDB"
            format = "json"

            [[fields]]
            name = "id"
            required = true
            case = "preserve"

            [[fields]]
            name = "primaryMuscles"
            kind = "list"
            required = true

            [[fields]]
            name = "secondaryMuscles"
            kind = "list"

            [[enrich]]
            kind = "union"
            output = "all_muscles"
            sources = ["primaryMuscles", "secondaryMuscles"]

            [[enrich]]
            kind = "count"
            output = "muscle_count"
            source = "all_muscles"

            [identity]
            keys = [["id"]]
            "#,
        )
        .unwrap();
        assert_eq!(domain.fields.len(), 3);
        assert_eq!(domain.enrich.len(), 2);
        let pipeline = domain.build_pipeline("exercises").unwrap();
        assert_eq!(pipeline.primary_key().map(|k| k.fields().to_vec()), Some(vec!["id".to_string()]));
    }

    #[test]
    fn test_unknown_rule_kind_is_rejected() {
        let err = DomainConfig::from_toml_str(
            r#"
            [source]
            origin = "x"

            [[enrich]]
            kind = "median"
            output = "m"
            "#,
        );
        assert!(matches!(err, Err(EtlError::Toml(_))));
    }
}
