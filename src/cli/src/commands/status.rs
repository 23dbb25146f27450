//! Flow execution status commands.
//!
//! Reads raw job status records from a JSON state file and reports the
//! statuses of a flow execution.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use gantry_core::status::{
    ExecutionOrdering, FlowExecutionTracker, InMemoryIssueRepository, InMemoryStateStore,
    JobStatus, JobStatusIter, StatusMapper,
};

use super::Settings;
use crate::output::{self, format_millis, OutputFormat};

#[derive(Subcommand)]
pub enum StatusCommands {
    /// Show the job statuses of the latest execution of a flow
    Latest {
        flow_group: String,
        flow_name: String,

        /// JSON file of recorded job status records
        #[arg(long, env = "GANTRY_STATE_FILE")]
        state_file: Option<PathBuf>,

        /// How the latest execution is chosen (most-recently-recorded, highest-id)
        #[arg(long)]
        ordering: Option<ExecutionOrdering>,
    },

    /// Show the job statuses of one flow execution
    Execution {
        flow_group: String,
        flow_name: String,
        execution_id: i64,

        /// Only show this job group (requires --job-name)
        #[arg(long, requires = "job_name")]
        job_group: Option<String>,

        /// Only show this job name (requires --job-group)
        #[arg(long, requires = "job_group")]
        job_name: Option<String>,

        /// JSON file of recorded job status records
        #[arg(long, env = "GANTRY_STATE_FILE")]
        state_file: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct StatusRow {
    #[tabled(rename = "Execution")]
    execution: i64,
    #[tabled(rename = "Job Group")]
    job_group: String,
    #[tabled(rename = "Job Name")]
    job_name: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Processed")]
    processed: i64,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Ended")]
    ended: String,
    #[tabled(rename = "Issues")]
    issues: usize,
}

impl From<&JobStatus> for StatusRow {
    fn from(status: &JobStatus) -> Self {
        Self {
            execution: status.flow_execution_id,
            job_group: status.job_group.clone().unwrap_or_else(|| "-".to_string()),
            job_name: status.job_name.clone().unwrap_or_else(|| "-".to_string()),
            event: status.event_name.clone().unwrap_or_else(|| "-".to_string()),
            processed: status.processed_count,
            attempts: format!("{}/{}", status.current_attempts, status.max_attempts),
            started: format_millis(status.start_time),
            ended: format_millis(status.end_time),
            issues: status.issues.len(),
        }
    }
}

/// Build a tracker over the state file, falling back to configured settings.
fn tracker(
    settings: &Settings,
    state_file: Option<PathBuf>,
    ordering: Option<ExecutionOrdering>,
) -> Result<FlowExecutionTracker> {
    let config = settings.status()?;
    let path = state_file
        .or(config.state_file)
        .context("No state file given; pass --state-file or set status.state_file")?;
    let ordering = ordering.unwrap_or(config.ordering);

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    let store = InMemoryStateStore::from_json(&json, ordering)
        .with_context(|| format!("Invalid state file {}", path.display()))?;

    let issues = Arc::new(InMemoryIssueRepository::new(config.max_issues_per_context));
    Ok(FlowExecutionTracker::new(
        Arc::new(store),
        StatusMapper::new(issues),
    ))
}

/// Collect every status, warning about records that fail to map.
fn collect(statuses: JobStatusIter) -> Vec<JobStatus> {
    statuses
        .filter_map(|status| match status {
            Ok(status) => Some(status),
            Err(e) => {
                output::print_error(&format!("Skipping record: {}", e));
                None
            }
        })
        .collect()
}

fn print_statuses(statuses: &[JobStatus], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<StatusRow> = statuses.iter().map(StatusRow::from).collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&statuses, format),
    }
}

pub async fn execute(
    cmd: StatusCommands,
    settings: &Settings,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        StatusCommands::Latest {
            flow_group,
            flow_name,
            state_file,
            ordering,
        } => {
            let tracker = tracker(settings, state_file, ordering)?;
            let statuses = tracker
                .latest_job_status_by_flow_name_and_group(&flow_group, &flow_name)
                .await?;
            let statuses = collect(statuses);

            if statuses.is_empty() {
                if let OutputFormat::Table = format {
                    output::print_info(&format!(
                        "No execution recorded for {}/{}",
                        flow_group, flow_name
                    ));
                    return Ok(());
                }
            }
            print_statuses(&statuses, format)?;
        }

        StatusCommands::Execution {
            flow_group,
            flow_name,
            execution_id,
            job_group,
            job_name,
            state_file,
        } => {
            let tracker = tracker(settings, state_file, None)?;
            let statuses = match (job_group, job_name) {
                (Some(group), Some(name)) => {
                    tracker
                        .job_statuses_for_job(&flow_group, &flow_name, execution_id, &group, &name)
                        .await?
                }
                _ => {
                    tracker
                        .job_statuses_for_flow_execution(&flow_group, &flow_name, execution_id)
                        .await?
                }
            };
            print_statuses(&collect(statuses), format)?;
        }
    }

    Ok(())
}
