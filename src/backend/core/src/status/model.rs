//! Typed job and flow statuses.

use serde::{Deserialize, Serialize};

use super::issues::Issue;

/// Job name and group of the record describing a whole flow execution.
pub const NA_KEY: &str = "NA";

/// Property names of a raw [`JobState`](super::JobState) record.
pub mod keys {
    pub const FLOW_GROUP: &str = "flowGroup";
    pub const FLOW_NAME: &str = "flowName";
    pub const FLOW_EXECUTION_ID: &str = "flowExecutionId";
    pub const JOB_NAME: &str = "jobName";
    pub const JOB_GROUP: &str = "jobGroup";
    pub const JOB_TAG: &str = "jobTag";
    pub const JOB_EXECUTION_ID: &str = "jobExecutionId";
    pub const EVENT_NAME: &str = "eventName";
    pub const ORCHESTRATED_TIME: &str = "jobOrchestratedTime";
    pub const START_TIME: &str = "jobStartTime";
    pub const END_TIME: &str = "jobEndTime";
    pub const MESSAGE: &str = "message";
    pub const LOW_WATERMARK: &str = "lowWatermark";
    pub const HIGH_WATERMARK: &str = "highWatermark";
    pub const PROCESSED_COUNT: &str = "processedCount";
    pub const MAX_ATTEMPTS: &str = "maxAttempts";
    pub const CURRENT_ATTEMPTS: &str = "currentAttempts";
    pub const SHOULD_RETRY: &str = "shouldRetry";
    pub const PROGRESS_PERCENTAGE: &str = "jobCompletionPercentage";
    pub const LAST_PROGRESS_EVENT_TIME: &str = "jobLastProgressEventTime";
}

/// Status of one job of one flow execution, or of the flow itself when both
/// `job_name` and `job_group` are [`NA_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub flow_group: String,
    pub flow_name: String,
    pub flow_execution_id: i64,
    pub job_name: Option<String>,
    pub job_group: Option<String>,
    pub job_tag: Option<String>,
    pub job_execution_id: i64,
    pub event_name: Option<String>,
    pub orchestrated_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub message: String,
    pub low_watermark: String,
    pub high_watermark: String,
    pub processed_count: i64,
    pub max_attempts: i32,
    pub current_attempts: i32,
    pub should_retry: bool,
    pub progress_percentage: i32,
    pub last_progress_event_time: i64,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl JobStatus {
    pub fn is_flow_status(&self) -> bool {
        self.job_name.as_deref() == Some(NA_KEY) && self.job_group.as_deref() == Some(NA_KEY)
    }
}

/// Whether `status` is the flow-level record of its execution.
pub fn is_flow_status(status: &JobStatus) -> bool {
    status.is_flow_status()
}
