//! Subcommands and the settings they share.

pub mod jobs;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use gantry_core::config::{CatalogConfig, Config, StatusConfig};

/// Where commands find their configuration.
pub struct Settings {
    config_file: Option<PathBuf>,
    job_dir: Option<PathBuf>,
}

impl Settings {
    pub fn new(config_file: Option<PathBuf>, job_dir: Option<PathBuf>) -> Self {
        Self {
            config_file,
            job_dir,
        }
    }

    fn load(&self) -> Result<Config> {
        match &self.config_file {
            Some(path) => {
                let path = path.to_string_lossy();
                Config::from_file(&path)
                    .with_context(|| format!("Failed to load configuration from {}", path))
            }
            None => Config::load().context(
                "No job directory given; pass --job-dir or --config, or set GANTRY__CATALOG__JOB_CONFIG_DIR",
            ),
        }
    }

    /// Catalog settings; `--job-dir` alone is enough.
    pub fn catalog(&self) -> Result<CatalogConfig> {
        match (&self.job_dir, &self.config_file) {
            (Some(dir), None) => Ok(CatalogConfig::new(dir)),
            (Some(dir), Some(_)) => {
                let mut catalog = self.load()?.catalog;
                catalog.job_config_dir = dir.clone();
                Ok(catalog)
            }
            (None, _) => Ok(self.load()?.catalog),
        }
    }

    /// Status settings, defaulted when no configuration file is given.
    pub fn status(&self) -> Result<StatusConfig> {
        match &self.config_file {
            Some(_) => Ok(self.load()?.status),
            None => Ok(StatusConfig::default()),
        }
    }
}
