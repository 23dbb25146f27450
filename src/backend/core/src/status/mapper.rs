//! Mapping of raw [`JobState`] records to typed [`JobStatus`]es.
//!
//! Every field the mapper reads is declared once in [`STATUS_FIELDS`] together
//! with what happens when the record lacks it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::issues::{context_id_for_job, IssueRepository};
use super::model::{keys, JobStatus};
use super::state::JobState;
use super::StatusError;

/// Behavior for a field absent from the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    /// Mapping fails with [`StatusError::MissingField`].
    Required,
    /// The typed field is left empty.
    Optional,
    /// The given text is parsed in place of the missing value.
    Value(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub default: FieldDefault,
}

impl FieldSpec {
    const fn required(key: &'static str) -> Self {
        Self { key, default: FieldDefault::Required }
    }

    const fn optional(key: &'static str) -> Self {
        Self { key, default: FieldDefault::Optional }
    }

    const fn or(key: &'static str, value: &'static str) -> Self {
        Self { key, default: FieldDefault::Value(value) }
    }
}

pub mod fields {
    use super::{keys, FieldSpec};

    pub const FLOW_GROUP: FieldSpec = FieldSpec::required(keys::FLOW_GROUP);
    pub const FLOW_NAME: FieldSpec = FieldSpec::required(keys::FLOW_NAME);
    pub const FLOW_EXECUTION_ID: FieldSpec = FieldSpec::required(keys::FLOW_EXECUTION_ID);
    pub const JOB_NAME: FieldSpec = FieldSpec::optional(keys::JOB_NAME);
    pub const JOB_GROUP: FieldSpec = FieldSpec::optional(keys::JOB_GROUP);
    pub const JOB_TAG: FieldSpec = FieldSpec::optional(keys::JOB_TAG);
    pub const JOB_EXECUTION_ID: FieldSpec = FieldSpec::or(keys::JOB_EXECUTION_ID, "0");
    pub const EVENT_NAME: FieldSpec = FieldSpec::optional(keys::EVENT_NAME);
    pub const ORCHESTRATED_TIME: FieldSpec = FieldSpec::or(keys::ORCHESTRATED_TIME, "0");
    pub const START_TIME: FieldSpec = FieldSpec::or(keys::START_TIME, "0");
    pub const END_TIME: FieldSpec = FieldSpec::or(keys::END_TIME, "0");
    pub const MESSAGE: FieldSpec = FieldSpec::or(keys::MESSAGE, "");
    pub const LOW_WATERMARK: FieldSpec = FieldSpec::or(keys::LOW_WATERMARK, "");
    pub const HIGH_WATERMARK: FieldSpec = FieldSpec::or(keys::HIGH_WATERMARK, "");
    pub const PROCESSED_COUNT: FieldSpec = FieldSpec::or(keys::PROCESSED_COUNT, "0");
    pub const MAX_ATTEMPTS: FieldSpec = FieldSpec::or(keys::MAX_ATTEMPTS, "1");
    pub const CURRENT_ATTEMPTS: FieldSpec = FieldSpec::or(keys::CURRENT_ATTEMPTS, "1");
    pub const SHOULD_RETRY: FieldSpec = FieldSpec::or(keys::SHOULD_RETRY, "false");
    pub const PROGRESS_PERCENTAGE: FieldSpec = FieldSpec::or(keys::PROGRESS_PERCENTAGE, "0");
    pub const LAST_PROGRESS_EVENT_TIME: FieldSpec =
        FieldSpec::or(keys::LAST_PROGRESS_EVENT_TIME, "0");
}

/// Every field read from a status record.
pub const STATUS_FIELDS: &[FieldSpec] = &[
    fields::FLOW_GROUP,
    fields::FLOW_NAME,
    fields::FLOW_EXECUTION_ID,
    fields::JOB_NAME,
    fields::JOB_GROUP,
    fields::JOB_TAG,
    fields::JOB_EXECUTION_ID,
    fields::EVENT_NAME,
    fields::ORCHESTRATED_TIME,
    fields::START_TIME,
    fields::END_TIME,
    fields::MESSAGE,
    fields::LOW_WATERMARK,
    fields::HIGH_WATERMARK,
    fields::PROCESSED_COUNT,
    fields::MAX_ATTEMPTS,
    fields::CURRENT_ATTEMPTS,
    fields::SHOULD_RETRY,
    fields::PROGRESS_PERCENTAGE,
    fields::LAST_PROGRESS_EVENT_TIME,
];

/// Typed reads over one record.
struct Fields<'a> {
    state: &'a JobState,
}

impl<'a> Fields<'a> {
    fn raw(&self, field: FieldSpec) -> Result<Option<&'a str>, StatusError> {
        match (self.state.get_prop(field.key), field.default) {
            (Some(value), _) => Ok(Some(value)),
            (None, FieldDefault::Required) => Err(StatusError::MissingField(field.key)),
            (None, FieldDefault::Optional) => Ok(None),
            (None, FieldDefault::Value(default)) => Ok(Some(default)),
        }
    }

    fn text(&self, field: FieldSpec) -> Result<String, StatusError> {
        Ok(self.raw(field)?.unwrap_or_default().to_string())
    }

    fn optional_text(&self, field: FieldSpec) -> Result<Option<String>, StatusError> {
        Ok(self.raw(field)?.map(str::to_string))
    }

    fn number<T: FromStr>(&self, field: FieldSpec, expected: &'static str) -> Result<T, StatusError> {
        let value = self.raw(field)?.unwrap_or_default();
        value.trim().parse().map_err(|_| StatusError::InvalidField {
            field: field.key,
            expected,
            value: value.to_string(),
        })
    }

    /// `true` only for a case-insensitive "true"; anything else is false.
    fn flag(&self, field: FieldSpec) -> Result<bool, StatusError> {
        Ok(self
            .raw(field)?
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("true")))
    }
}

/// Builds [`JobStatus`]es from raw records and attaches their issues.
#[derive(Clone)]
pub struct StatusMapper {
    issues: Arc<dyn IssueRepository>,
}

impl fmt::Debug for StatusMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusMapper").finish_non_exhaustive()
    }
}

impl StatusMapper {
    pub fn new(issues: Arc<dyn IssueRepository>) -> Self {
        Self { issues }
    }

    pub fn map(&self, state: &JobState) -> Result<JobStatus, StatusError> {
        let f = Fields { state };

        let flow_group = f.text(fields::FLOW_GROUP)?;
        let flow_name = f.text(fields::FLOW_NAME)?;
        let flow_execution_id: i64 = f.number(fields::FLOW_EXECUTION_ID, "integer")?;
        let job_name = f.optional_text(fields::JOB_NAME)?;

        let context_id = context_id_for_job(
            &flow_group,
            &flow_name,
            flow_execution_id,
            job_name.as_deref().unwrap_or_default(),
        );
        let issues = match self.issues.get_all(&context_id) {
            Ok(issues) => issues,
            Err(e) => {
                tracing::warn!(context_id = %context_id, error = %e, "Cannot retrieve job issues");
                Vec::new()
            }
        };

        Ok(JobStatus {
            job_group: f.optional_text(fields::JOB_GROUP)?,
            job_tag: f.optional_text(fields::JOB_TAG)?,
            job_execution_id: f.number(fields::JOB_EXECUTION_ID, "integer")?,
            event_name: f.optional_text(fields::EVENT_NAME)?,
            orchestrated_time: f.number(fields::ORCHESTRATED_TIME, "integer")?,
            start_time: f.number(fields::START_TIME, "integer")?,
            end_time: f.number(fields::END_TIME, "integer")?,
            message: f.text(fields::MESSAGE)?,
            low_watermark: f.text(fields::LOW_WATERMARK)?,
            high_watermark: f.text(fields::HIGH_WATERMARK)?,
            processed_count: f.number(fields::PROCESSED_COUNT, "integer")?,
            max_attempts: f.number(fields::MAX_ATTEMPTS, "integer")?,
            current_attempts: f.number(fields::CURRENT_ATTEMPTS, "integer")?,
            should_retry: f.flag(fields::SHOULD_RETRY)?,
            progress_percentage: f.number(fields::PROGRESS_PERCENTAGE, "integer")?,
            last_progress_event_time: f.number(fields::LAST_PROGRESS_EVENT_TIME, "integer")?,
            flow_group,
            flow_name,
            flow_execution_id,
            job_name,
            issues,
        })
    }
}
