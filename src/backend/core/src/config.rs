//! Configuration management.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::{CatalogError, DocumentFormat};
use crate::error::Result;
use crate::status::ExecutionOrdering;
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Job catalog configuration
    pub catalog: CatalogConfig,

    /// Flow status configuration
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Root directory holding job configuration files
    pub job_config_dir: PathBuf,

    /// Interval between two scans of the job configuration directory
    #[serde(default = "default_polling_interval", with = "humantime_serde")]
    pub polling_interval: Duration,

    /// Comma-separated key=value job file extensions
    #[serde(default = "default_extensions")]
    pub extensions: String,

    /// Comma-separated structured job file extensions. Each entry is a format
    /// name used as its own extension (`json`, `yml`) or `ext:format` (`conf:json`)
    #[serde(default = "default_structured_extensions")]
    pub structured_extensions: String,

    /// Extension of global configuration files merged under every job below them
    #[serde(default = "default_global_extension")]
    pub global_extension: String,
}

impl CatalogConfig {
    /// Create a catalog configuration rooted at `job_config_dir` with defaults.
    pub fn new(job_config_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_config_dir: job_config_dir.into(),
            polling_interval: default_polling_interval(),
            extensions: default_extensions(),
            structured_extensions: default_structured_extensions(),
            global_extension: default_global_extension(),
        }
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_extensions(mut self, extensions: impl Into<String>) -> Self {
        self.extensions = extensions.into();
        self
    }

    pub fn with_structured_extensions(mut self, extensions: impl Into<String>) -> Self {
        self.structured_extensions = extensions.into();
        self
    }

    pub fn with_global_extension(mut self, extension: impl Into<String>) -> Self {
        self.global_extension = extension.into();
        self
    }

    /// Every extension recognized as a job file, lower-cased and without dots.
    pub fn job_extensions(&self) -> BTreeSet<String> {
        let mut extensions = parse_extensions(&self.extensions);
        extensions.extend(structured_entries(&self.structured_extensions).map(|(ext, _)| ext));
        extensions
    }

    /// Structured job extensions and the document format each is decoded as.
    pub fn structured_formats(
        &self,
    ) -> std::result::Result<BTreeMap<String, DocumentFormat>, CatalogError> {
        structured_entries(&self.structured_extensions)
            .map(|(extension, format)| match DocumentFormat::from_name(&format) {
                Some(format) => Ok((extension, format)),
                None => Err(CatalogError::InvalidConfig(format!(
                    "unknown document format '{}' for structured extension '{}'",
                    format, extension
                ))),
            })
            .collect()
    }

    /// Normalized global configuration extension.
    pub fn global_extension(&self) -> String {
        normalize_extension(&self.global_extension)
    }

    /// Check the settings the catalog cannot run without.
    pub fn validate(&self) -> std::result::Result<(), CatalogError> {
        if self.job_config_dir.as_os_str().is_empty() {
            return Err(CatalogError::InvalidConfig(
                "catalog.job_config_dir must be set".to_string(),
            ));
        }
        if self.polling_interval.is_zero() {
            return Err(CatalogError::InvalidConfig(
                "catalog.polling_interval must be greater than zero".to_string(),
            ));
        }
        self.structured_formats()?;
        let jobs = self.job_extensions();
        if jobs.is_empty() {
            return Err(CatalogError::InvalidConfig(
                "at least one job file extension is required".to_string(),
            ));
        }
        let global = self.global_extension();
        if jobs.contains(&global) {
            return Err(CatalogError::InvalidConfig(format!(
                "global extension '{}' is also configured as a job extension",
                global
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// JSON file of raw job status records for the in-memory state store
    pub state_file: Option<PathBuf>,

    /// How the state store decides which execution is the latest
    #[serde(default)]
    pub ordering: ExecutionOrdering,

    /// Issues retained per context by the in-memory issue repository
    #[serde(default = "default_max_issues_per_context")]
    pub max_issues_per_context: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            ordering: ExecutionOrdering::default(),
            max_issues_per_context: default_max_issues_per_context(),
        }
    }
}

/// Split a comma-separated extension list, ignoring blanks and case.
pub fn parse_extensions(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(normalize_extension)
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// `(extension, format name)` pairs of a structured extension list.
fn structured_entries(value: &str) -> impl Iterator<Item = (String, String)> + '_ {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((ext, format)) => (normalize_extension(ext), normalize_extension(format)),
            None => (normalize_extension(entry), normalize_extension(entry)),
        })
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

// Default value functions
fn default_polling_interval() -> Duration { Duration::from_secs(30) }
fn default_extensions() -> String { "pull,job".to_string() }
fn default_structured_extensions() -> String { "json,toml,yaml,yml".to_string() }
fn default_global_extension() -> String { "properties".to_string() }
fn default_max_issues_per_context() -> usize { 100 }

impl Config {
    /// Load configuration from the environment (`GANTRY__CATALOG__JOB_CONFIG_DIR`, ...).
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GANTRY").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.catalog.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GANTRY").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.catalog.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_config_defaults() {
        let config = CatalogConfig::new("/etc/gantry/jobs");
        assert_eq!(config.polling_interval, Duration::from_secs(30));
        assert_eq!(config.global_extension(), "properties");
        let exts = config.job_extensions();
        for ext in ["pull", "job", "json", "toml", "yaml", "yml"] {
            assert!(exts.contains(ext), "missing {ext}");
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_extensions_is_case_insensitive() {
        let exts = parse_extensions(" PULL, .Job ,, conf ");
        assert_eq!(
            exts.into_iter().collect::<Vec<_>>(),
            vec!["conf".to_string(), "job".to_string(), "pull".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_missing_dir() {
        let config = CatalogConfig::new("");
        assert!(matches!(config.validate(), Err(CatalogError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_global_job_overlap() {
        let config = CatalogConfig::new("/jobs").with_extensions("pull,properties");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_structured_formats_with_custom_extension() {
        let config = CatalogConfig::new("/jobs").with_structured_extensions("json, conf:TOML, .hocon:json");
        let formats = config.structured_formats().unwrap();
        assert_eq!(formats.get("json"), Some(&DocumentFormat::Json));
        assert_eq!(formats.get("conf"), Some(&DocumentFormat::Toml));
        assert_eq!(formats.get("hocon"), Some(&DocumentFormat::Json));
        assert!(config.job_extensions().contains("conf"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_structured_format() {
        let config = CatalogConfig::new("/jobs").with_structured_extensions("json,conf");
        assert!(matches!(config.validate(), Err(CatalogError::InvalidConfig(_))));

        let config = CatalogConfig::new("/jobs").with_structured_extensions("conf:xml");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_with_humantime_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gantry.toml");
        std::fs::write(
            &path,
            "[catalog]\njob_config_dir = \"/srv/jobs\"\npolling_interval = \"5s\"\n\n[status]\nordering = \"highest_id\"\n",
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.catalog.job_config_dir, PathBuf::from("/srv/jobs"));
        assert_eq!(config.catalog.polling_interval, Duration::from_secs(5));
        assert_eq!(config.catalog.extensions, "pull,job");
        assert_eq!(config.status.ordering, ExecutionOrdering::HighestId);
        assert_eq!(config.status.max_issues_per_context, 100);
    }
}
