//! Diagnostics attached to job statuses.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

/// Default number of issues kept per context by [`InMemoryIssueRepository`].
pub const DEFAULT_MAX_ISSUES_PER_CONTEXT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// A diagnostic reported against one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub time: DateTime<Utc>,
    pub severity: IssueSeverity,
    pub code: String,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub source_class: String,
    #[serde(default)]
    pub exception_class: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Issue {
    pub fn new(severity: IssueSeverity, code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            severity,
            code: code.into(),
            summary: summary.into(),
            details: String::new(),
            source_class: String::new(),
            exception_class: String::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TroubleshooterError {
    #[error("Issue repository unavailable: {0}")]
    Unavailable(String),

    #[error("Issue lookup failed for {context_id}: {message}")]
    Lookup { context_id: String, message: String },
}

/// Store of issues keyed by context id.
pub trait IssueRepository: Send + Sync {
    /// Issues for `context_id`, oldest first.
    fn get_all(&self, context_id: &str) -> Result<Vec<Issue>, TroubleshooterError>;
}

/// Context id of a job execution: `flowGroup:flowName:flowExecutionId:jobName`.
pub fn context_id_for_job(
    flow_group: &str,
    flow_name: &str,
    flow_execution_id: i64,
    job_name: &str,
) -> String {
    format!("{}:{}:{}:{}", flow_group, flow_name, flow_execution_id, job_name)
}

/// Bounded in-memory [`IssueRepository`]; the oldest issue of a context is
/// evicted once it holds `max_issues_per_context` entries.
#[derive(Debug)]
pub struct InMemoryIssueRepository {
    max_issues_per_context: usize,
    issues: RwLock<HashMap<String, VecDeque<Issue>>>,
}

impl Default for InMemoryIssueRepository {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ISSUES_PER_CONTEXT)
    }
}

impl InMemoryIssueRepository {
    pub fn new(max_issues_per_context: usize) -> Self {
        Self {
            max_issues_per_context: max_issues_per_context.max(1),
            issues: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, context_id: impl Into<String>, issue: Issue) {
        let mut issues = self.issues.write();
        let bucket = issues.entry(context_id.into()).or_default();
        if bucket.len() >= self.max_issues_per_context {
            bucket.pop_front();
        }
        bucket.push_back(issue);
    }

    pub fn remove(&self, context_id: &str) {
        self.issues.write().remove(context_id);
    }
}

impl IssueRepository for InMemoryIssueRepository {
    fn get_all(&self, context_id: &str) -> Result<Vec<Issue>, TroubleshooterError> {
        Ok(self
            .issues
            .read()
            .get(context_id)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default())
    }
}
