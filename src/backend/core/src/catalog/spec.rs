//! Job specifications and their decoded configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Key holding the job name.
pub const JOB_NAME_KEY: &str = "job.name";
/// Key holding the free-form job description.
pub const JOB_DESCRIPTION_KEY: &str = "job.description";
/// Key holding the job specification version.
pub const JOB_VERSION_KEY: &str = "job.version";
/// Key injected by the loader with the absolute path of the source file.
pub const JOB_CONFIG_FILE_PATH_KEY: &str = "job.config.path";
/// Version reported for specs that do not declare one.
pub const DEFAULT_JOB_VERSION: &str = "1";

// ═══════════════════════════════════════════════════════════════════════════════
// JobConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded job configuration: flattened dotted keys mapped to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobConfig(BTreeMap<String, String>);

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a decoded document. Nested tables join their keys with `.`,
    /// arrays become comma-separated values and nulls become empty strings.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let mut entries = BTreeMap::new();
        flatten_into("", value, &mut entries);
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Overlay `self` on top of `base`; keys present in `self` win.
    pub fn merged_over(&self, base: &JobConfig) -> JobConfig {
        let mut merged = base.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        JobConfig(merged)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn flatten_into(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(&path, child, out);
            }
        }
        Value::Array(items) => {
            let joined = items.iter().map(scalar_text).collect::<Vec<_>>().join(",");
            out.insert(prefix.to_string(), joined);
        }
        other => {
            out.insert(prefix.to_string(), scalar_text(other));
        }
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JobSpec
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable description of one schedulable job, derived from one file.
///
/// A changed file yields a new `JobSpec` with the same uri; specs are never
/// updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    uri: String,
    version: String,
    description: String,
    config: JobConfig,
    source_path: PathBuf,
}

impl JobSpec {
    /// Root-relative path of the source file, `/`-separated.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn job_name(&self) -> Option<&str> {
        self.config.get(JOB_NAME_KEY)
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.uri, self.version)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SpecConverter
// ═══════════════════════════════════════════════════════════════════════════════

/// A decoded file, before conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: JobConfig,
}

/// Turns decoded files into [`JobSpec`]s and maps uris to paths under the root.
#[derive(Debug, Clone)]
pub struct SpecConverter {
    root: PathBuf,
}

impl SpecConverter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn convert(&self, loaded: LoadedConfig) -> JobSpec {
        let LoadedConfig { path, config } = loaded;
        let version = config.get_or(JOB_VERSION_KEY, DEFAULT_JOB_VERSION).to_string();
        let description = config.get_or(JOB_DESCRIPTION_KEY, "").to_string();

        JobSpec {
            uri: self.uri_for(&path),
            version,
            description,
            config,
            source_path: path,
        }
    }

    /// Root-relative, `/`-separated identifier of `path`. Paths outside the
    /// root keep their full (lossy) representation.
    pub fn uri_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    /// Path addressed by `uri`, or `None` when the uri is empty, absolute, or
    /// climbs out of the root.
    pub fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let relative = Path::new(uri.trim_start_matches("./"));
        if uri.is_empty() || relative.is_absolute() {
            return None;
        }

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}
