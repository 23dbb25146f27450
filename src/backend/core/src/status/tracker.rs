//! Latest-execution lookups over a [`StateStore`].

use std::fmt;
use std::sync::Arc;

use super::mapper::StatusMapper;
use super::model::{keys, JobStatus, NA_KEY};
use super::state::JobState;
use super::store::StateStore;
use super::StatusError;

/// Returned by [`FlowExecutionTracker::latest_execution_id_for_flow`] when
/// the flow has no recorded execution.
pub const NO_EXECUTION_ID: i64 = -1;

/// Lazily maps fetched records; each item is mapped on `next()`.
pub struct JobStatusIter {
    records: std::vec::IntoIter<JobState>,
    mapper: StatusMapper,
}

impl JobStatusIter {
    fn new(records: Vec<JobState>, mapper: StatusMapper) -> Self {
        Self {
            records: records.into_iter(),
            mapper,
        }
    }
}

impl fmt::Debug for JobStatusIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStatusIter")
            .field("remaining", &self.records.len())
            .finish()
    }
}

impl Iterator for JobStatusIter {
    type Item = Result<JobStatus, StatusError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(self.mapper.map(&record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for JobStatusIter {}

/// Finds the latest executions of flows and their job statuses.
#[derive(Clone)]
pub struct FlowExecutionTracker {
    store: Arc<dyn StateStore>,
    mapper: StatusMapper,
}

impl fmt::Debug for FlowExecutionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowExecutionTracker").finish_non_exhaustive()
    }
}

impl FlowExecutionTracker {
    pub fn new(store: Arc<dyn StateStore>, mapper: StatusMapper) -> Self {
        Self { store, mapper }
    }

    pub fn mapper(&self) -> &StatusMapper {
        &self.mapper
    }

    /// Up to `count` execution ids, latest first, as ordered by the store.
    pub async fn latest_execution_ids_for_flow(
        &self,
        flow_group: &str,
        flow_name: &str,
        count: usize,
    ) -> Result<Vec<i64>, StatusError> {
        self.store
            .latest_execution_ids(flow_group, flow_name, count)
            .await
    }

    /// Latest execution id, or [`NO_EXECUTION_ID`].
    pub async fn latest_execution_id_for_flow(
        &self,
        flow_group: &str,
        flow_name: &str,
    ) -> Result<i64, StatusError> {
        let ids = self
            .latest_execution_ids_for_flow(flow_group, flow_name, 1)
            .await?;
        Ok(ids.first().copied().unwrap_or(NO_EXECUTION_ID))
    }

    pub async fn job_statuses_for_flow_execution(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
    ) -> Result<JobStatusIter, StatusError> {
        let records = self
            .store
            .get_all(flow_group, flow_name, flow_execution_id)
            .await?;
        Ok(JobStatusIter::new(records, self.mapper.clone()))
    }

    /// Statuses of one job of a flow execution.
    pub async fn job_statuses_for_job(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
        job_group: &str,
        job_name: &str,
    ) -> Result<JobStatusIter, StatusError> {
        let mut records = self
            .store
            .get_all(flow_group, flow_name, flow_execution_id)
            .await?;
        records.retain(|r| {
            r.get_prop(keys::JOB_GROUP) == Some(job_group)
                && r.get_prop(keys::JOB_NAME) == Some(job_name)
        });
        Ok(JobStatusIter::new(records, self.mapper.clone()))
    }

    /// Statuses of the latest execution; empty when the flow never ran.
    pub async fn latest_job_status_by_flow_name_and_group(
        &self,
        flow_group: &str,
        flow_name: &str,
    ) -> Result<JobStatusIter, StatusError> {
        let latest = self
            .latest_execution_id_for_flow(flow_group, flow_name)
            .await?;
        if latest == NO_EXECUTION_ID {
            tracing::debug!(flow_group, flow_name, "No execution recorded for flow");
            return Ok(JobStatusIter::new(Vec::new(), self.mapper.clone()));
        }
        self.job_statuses_for_flow_execution(flow_group, flow_name, latest)
            .await
    }

    /// Flow-level status of the latest execution, if one was recorded.
    pub async fn latest_flow_status(
        &self,
        flow_group: &str,
        flow_name: &str,
    ) -> Result<Option<JobStatus>, StatusError> {
        let latest = self
            .latest_execution_id_for_flow(flow_group, flow_name)
            .await?;
        if latest == NO_EXECUTION_ID {
            return Ok(None);
        }
        self.job_statuses_for_job(flow_group, flow_name, latest, NA_KEY, NA_KEY)
            .await?
            .next()
            .transpose()
    }

    pub fn is_flow_status(&self, status: &JobStatus) -> bool {
        status.is_flow_status()
    }
}
