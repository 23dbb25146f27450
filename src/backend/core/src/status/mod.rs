//! Flow execution status aggregation.
//!
//! Raw [`JobState`] records come from a [`StateStore`]; the [`StatusMapper`]
//! turns them into typed [`JobStatus`]es with their issues attached, and the
//! [`FlowExecutionTracker`] picks out the latest execution of a flow.

pub mod issues;
pub mod mapper;
pub mod model;
pub mod state;
pub mod store;
pub mod tracker;

pub use issues::{
    context_id_for_job, InMemoryIssueRepository, Issue, IssueRepository, IssueSeverity,
    TroubleshooterError,
};
pub use mapper::{FieldDefault, FieldSpec, StatusMapper, STATUS_FIELDS};
pub use model::{is_flow_status, keys, JobStatus, NA_KEY};
pub use state::JobState;
pub use store::{ExecutionOrdering, InMemoryStateStore, StateStore};
pub use tracker::{FlowExecutionTracker, JobStatusIter, NO_EXECUTION_ID};

use thiserror::Error;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("Missing required status field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for status field {field}: expected {expected}, got '{value}'")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("State store error: {0}")]
    Store(String),
}

impl StatusError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingField(_) => ErrorCode::MissingStatusField,
            Self::InvalidField { .. } => ErrorCode::InvalidStatusField,
            Self::Store(_) => ErrorCode::StateStoreFailed,
        }
    }
}
