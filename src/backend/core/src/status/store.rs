//! State stores holding raw status records per flow execution.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::model::keys;
use super::state::JobState;
use super::StatusError;

/// Source of raw status records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Up to `count` execution ids of the flow, latest first. What "latest"
    /// means is up to the store.
    async fn latest_execution_ids(
        &self,
        flow_group: &str,
        flow_name: &str,
        count: usize,
    ) -> Result<Vec<i64>, StatusError>;

    /// Every record of one flow execution.
    async fn get_all(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
    ) -> Result<Vec<JobState>, StatusError>;
}

/// How [`InMemoryStateStore`] orders executions of a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrdering {
    /// The execution whose first record arrived last is the latest.
    #[default]
    MostRecentlyRecorded,
    /// The numerically highest execution id is the latest.
    HighestId,
}

impl fmt::Display for ExecutionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MostRecentlyRecorded => f.write_str("most_recently_recorded"),
            Self::HighestId => f.write_str("highest_id"),
        }
    }
}

impl FromStr for ExecutionOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "most_recently_recorded" | "recorded" => Ok(Self::MostRecentlyRecorded),
            "highest_id" | "id" => Ok(Self::HighestId),
            other => Err(format!("unknown execution ordering: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
struct Execution {
    id: i64,
    records: Vec<JobState>,
}

type FlowKey = (String, String);

/// [`StateStore`] kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    ordering: ExecutionOrdering,
    // Executions per flow, in order of first recording.
    flows: RwLock<HashMap<FlowKey, Vec<Execution>>>,
}

impl InMemoryStateStore {
    pub fn new(ordering: ExecutionOrdering) -> Self {
        Self {
            ordering,
            flows: RwLock::new(HashMap::new()),
        }
    }

    pub fn ordering(&self) -> ExecutionOrdering {
        self.ordering
    }

    /// Record `state` under its flow execution. A record with the same job
    /// group and name replaces the earlier one.
    pub fn put(&self, state: JobState) -> Result<(), StatusError> {
        let flow_group = required(&state, keys::FLOW_GROUP)?.to_string();
        let flow_name = required(&state, keys::FLOW_NAME)?.to_string();
        let raw_id = required(&state, keys::FLOW_EXECUTION_ID)?;
        let id: i64 = raw_id.trim().parse().map_err(|_| StatusError::InvalidField {
            field: keys::FLOW_EXECUTION_ID,
            expected: "integer",
            value: raw_id.to_string(),
        })?;

        let mut flows = self.flows.write();
        let executions = flows.entry((flow_group, flow_name)).or_default();
        let execution = match executions.iter().position(|e| e.id == id) {
            Some(index) => &mut executions[index],
            None => {
                executions.push(Execution {
                    id,
                    records: Vec::new(),
                });
                let last = executions.len() - 1;
                &mut executions[last]
            }
        };

        let same_job = |r: &JobState| {
            r.get_prop(keys::JOB_GROUP) == state.get_prop(keys::JOB_GROUP)
                && r.get_prop(keys::JOB_NAME) == state.get_prop(keys::JOB_NAME)
        };
        match execution.records.iter().position(same_job) {
            Some(index) => execution.records[index] = state,
            None => execution.records.push(state),
        }
        Ok(())
    }

    /// Load records from a JSON array of flat objects. Scalars are stored as
    /// their text; nulls are dropped.
    pub fn from_json(json: &str, ordering: ExecutionOrdering) -> Result<Self, StatusError> {
        let records: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_str(json).map_err(|e| StatusError::Store(e.to_string()))?;

        let store = Self::new(ordering);
        for record in records {
            let state: JobState = record
                .into_iter()
                .filter_map(|(key, value)| match value {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some((key, s)),
                    other => Some((key, other.to_string())),
                })
                .collect();
            store.put(state)?;
        }
        Ok(store)
    }

    pub fn execution_count(&self, flow_group: &str, flow_name: &str) -> usize {
        self.flows
            .read()
            .get(&(flow_group.to_string(), flow_name.to_string()))
            .map_or(0, Vec::len)
    }
}

fn required<'a>(state: &'a JobState, key: &'static str) -> Result<&'a str, StatusError> {
    state.get_prop(key).ok_or(StatusError::MissingField(key))
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn latest_execution_ids(
        &self,
        flow_group: &str,
        flow_name: &str,
        count: usize,
    ) -> Result<Vec<i64>, StatusError> {
        let flows = self.flows.read();
        let Some(executions) = flows.get(&(flow_group.to_string(), flow_name.to_string())) else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<i64> = executions.iter().map(|e| e.id).collect();
        match self.ordering {
            ExecutionOrdering::MostRecentlyRecorded => ids.reverse(),
            ExecutionOrdering::HighestId => ids.sort_unstable_by(|a, b| b.cmp(a)),
        }
        ids.truncate(count);
        Ok(ids)
    }

    async fn get_all(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
    ) -> Result<Vec<JobState>, StatusError> {
        Ok(self
            .flows
            .read()
            .get(&(flow_group.to_string(), flow_name.to_string()))
            .and_then(|executions| executions.iter().find(|e| e.id == flow_execution_id))
            .map(|e| e.records.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, job: &str) -> JobState {
        JobState::new()
            .with_prop(keys::FLOW_GROUP, "g")
            .with_prop(keys::FLOW_NAME, "f")
            .with_prop(keys::FLOW_EXECUTION_ID, id)
            .with_prop(keys::JOB_GROUP, "etl")
            .with_prop(keys::JOB_NAME, job)
    }

    #[tokio::test]
    async fn test_ordering_policies() {
        for (ordering, expected) in [
            (ExecutionOrdering::MostRecentlyRecorded, vec![200, 300, 100]),
            (ExecutionOrdering::HighestId, vec![300, 200, 100]),
        ] {
            let store = InMemoryStateStore::new(ordering);
            for id in [100, 300, 200] {
                store.put(record(id, "extract")).unwrap();
            }
            assert_eq!(store.latest_execution_ids("g", "f", 10).await.unwrap(), expected);
            assert_eq!(store.latest_execution_ids("g", "f", 1).await.unwrap(), vec![expected[0]]);
        }
    }

    #[tokio::test]
    async fn test_put_replaces_same_job() {
        let store = InMemoryStateStore::default();
        store.put(record(1, "extract").with_prop(keys::EVENT_NAME, "RUNNING")).unwrap();
        store.put(record(1, "extract").with_prop(keys::EVENT_NAME, "COMPLETE")).unwrap();
        store.put(record(1, "load")).unwrap();

        let records = store.get_all("g", "f", 1).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_prop(keys::EVENT_NAME), Some("COMPLETE"));
        assert_eq!(store.execution_count("g", "f"), 1);
    }

    #[tokio::test]
    async fn test_unknown_flow_is_empty() {
        let store = InMemoryStateStore::default();
        assert!(store.latest_execution_ids("g", "none", 1).await.unwrap().is_empty());
        assert!(store.get_all("g", "none", 1).await.unwrap().is_empty());
    }

    #[test]
    fn test_put_requires_flow_keys() {
        let store = InMemoryStateStore::default();
        let err = store.put(JobState::new().with_prop(keys::FLOW_GROUP, "g")).unwrap_err();
        assert_eq!(err, StatusError::MissingField(keys::FLOW_NAME));
    }

    #[tokio::test]
    async fn test_from_json_stringifies_scalars() {
        let json = r#"[
            {"flowGroup": "g", "flowName": "f", "flowExecutionId": 7, "jobName": "NA", "jobGroup": "NA", "shouldRetry": true, "message": null}
        ]"#;
        let store = InMemoryStateStore::from_json(json, ExecutionOrdering::HighestId).unwrap();
        let records = store.get_all("g", "f", 7).await.unwrap();

        assert_eq!(records[0].get_prop(keys::FLOW_EXECUTION_ID), Some("7"));
        assert_eq!(records[0].get_prop(keys::SHOULD_RETRY), Some("true"));
        assert_eq!(records[0].get_prop(keys::MESSAGE), None);
    }

    #[test]
    fn test_ordering_parse() {
        assert_eq!("highest-id".parse::<ExecutionOrdering>().unwrap(), ExecutionOrdering::HighestId);
        assert_eq!(
            "most_recently_recorded".parse::<ExecutionOrdering>().unwrap(),
            ExecutionOrdering::MostRecentlyRecorded
        );
        assert!("newest".parse::<ExecutionOrdering>().is_err());
    }
}
