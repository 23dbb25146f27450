//! Decoding of job file contents into [`JobConfig`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use thiserror::Error;

use config::{Config, File, FileFormat};

use super::spec::JobConfig;

/// Decoding failure; the loader attaches the path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Turns the text of one file into a flattened [`JobConfig`].
pub trait ConfigDecoder: Send + Sync + Debug {
    fn decode(&self, path: &Path, contents: &str) -> Result<JobConfig, DecodeError>;
}

/// Structured document formats a job file can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Json,
    Json5,
    Toml,
    Yaml,
}

impl DocumentFormat {
    /// Format for a name such as `json` or `yml`, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "json5" => Some(Self::Json5),
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    fn file_format(self) -> FileFormat {
        match self {
            Self::Json => FileFormat::Json,
            Self::Json5 => FileFormat::Json5,
            Self::Toml => FileFormat::Toml,
            Self::Yaml => FileFormat::Yaml,
        }
    }
}

/// Default decoder built on the `config` crate.
///
/// Files whose extension is mapped to a [`DocumentFormat`] are parsed as
/// structured documents; everything else (including `pull`, `job` and
/// `properties`) as `key=value` lines.
#[derive(Debug, Clone)]
pub struct FormatDecoder {
    structured: BTreeMap<String, DocumentFormat>,
}

impl Default for FormatDecoder {
    fn default() -> Self {
        let structured = ["json", "json5", "toml", "yaml", "yml"]
            .into_iter()
            .filter_map(|ext| DocumentFormat::from_name(ext).map(|f| (ext.to_string(), f)))
            .collect();
        Self { structured }
    }
}

impl FormatDecoder {
    /// Decoder with an explicit extension to format mapping. Extensions are
    /// lower-case, without the dot.
    pub fn new(structured: BTreeMap<String, DocumentFormat>) -> Self {
        Self { structured }
    }

    pub fn format_for(&self, path: &Path) -> FileFormat {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.structured
            .get(&extension)
            .map(|format| format.file_format())
            .unwrap_or(FileFormat::Ini)
    }
}

impl ConfigDecoder for FormatDecoder {
    fn decode(&self, path: &Path, contents: &str) -> Result<JobConfig, DecodeError> {
        if contents.trim().is_empty() {
            return Ok(JobConfig::new());
        }

        let document = Config::builder()
            .add_source(File::from_str(contents, self.format_for(path)))
            .build()
            .and_then(|c| c.try_deserialize::<serde_json::Value>())
            .map_err(|e| DecodeError(e.to_string()))?;

        Ok(JobConfig::from_value(&document))
    }
}
