#![allow(clippy::result_large_err)]
//! # Gantry Core
//!
//! Filesystem job-spec catalog and flow execution status aggregation.
//!
//! ## Architecture
//!
//! - **Catalog**: Polls a directory of job files, keeps an immutable snapshot of
//!   [`JobSpec`](catalog::JobSpec)s and notifies listeners of additions, updates and removals
//! - **Status**: Maps raw execution records into typed job/flow statuses and finds
//!   the latest execution of a flow
//! - **Telemetry**: Structured logging with redaction, catalog metrics through the `metrics` facade
//! - **Config**: Layered file + environment configuration

pub mod catalog;
pub mod config;
pub mod error;
pub mod status;
pub mod telemetry;

pub use error::{ErrorCode, GantryError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{
        CatalogError, CatalogEvent, CatalogState, FsJobCatalog, JobCatalogListener, JobConfig,
        JobSpec, ListenerError, ListenerResult, Liveness, LivenessFlag,
    };
    pub use crate::config::{CatalogConfig, Config, StatusConfig};
    pub use crate::error::{ErrorCode, GantryError, Result};
    pub use crate::status::{
        is_flow_status, ExecutionOrdering, FlowExecutionTracker, InMemoryIssueRepository,
        InMemoryStateStore, IssueRepository, JobState, JobStatus, StateStore, StatusError,
        StatusMapper, NA_KEY, NO_EXECUTION_ID,
    };
}
