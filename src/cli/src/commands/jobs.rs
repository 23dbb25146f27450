//! Job catalog commands.
//!
//! Provides list, get and watch operations over a job configuration directory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use gantry_core::catalog::{FsJobCatalog, JobCatalogListener, JobSpec, ListenerResult};
use gantry_core::telemetry::SensitiveFieldRedactor;

use super::Settings;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobsCommands {
    /// List every job spec in the directory
    List,

    /// Show one job spec
    Get {
        /// Job uri, relative to the job directory (e.g. sub/b.pull)
        uri: String,

        /// Print sensitive configuration values unredacted
        #[arg(long)]
        show_secrets: bool,
    },

    /// Print job changes as they are detected
    Watch {
        /// Seconds between two scans
        #[arg(short, long, default_value = "2")]
        interval: u64,
    },
}

// ── Views ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "URI")]
    uri: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Keys")]
    keys: usize,
}

impl From<&JobSpec> for JobRow {
    fn from(spec: &JobSpec) -> Self {
        Self {
            uri: spec.uri().to_string(),
            version: spec.version().to_string(),
            name: spec.job_name().unwrap_or("-").to_string(),
            description: spec.description().to_string(),
            keys: spec.config().len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JobDetail {
    uri: String,
    version: String,
    description: String,
    source_path: String,
    config: Vec<(String, String)>,
}

impl JobDetail {
    fn new(spec: &JobSpec, show_secrets: bool) -> Self {
        let redactor = SensitiveFieldRedactor::global();
        Self {
            uri: spec.uri().to_string(),
            version: spec.version().to_string(),
            description: spec.description().to_string(),
            source_path: spec.source_path().display().to_string(),
            config: spec
                .config()
                .iter()
                .map(|(k, v)| {
                    let value = if show_secrets { v.to_string() } else { redactor.redact(k, v) };
                    (k.to_string(), value)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ChangeLine<'a> {
    Added { uri: &'a str, version: &'a str },
    Updated { uri: &'a str, version: &'a str },
    Deleted { uri: &'a str, version: &'a str },
}

/// Prints every catalog change it receives.
struct PrintingListener {
    format: OutputFormat,
}

impl PrintingListener {
    fn print(&self, line: ChangeLine<'_>) {
        match self.format {
            OutputFormat::Table => {
                let (action, uri, version) = match &line {
                    ChangeLine::Added { uri, version } => ("added", uri, version),
                    ChangeLine::Updated { uri, version } => ("updated", uri, version),
                    ChangeLine::Deleted { uri, version } => ("deleted", uri, version),
                };
                output::print_change(action, uri, version);
            }
            // One compact JSON document per line so the stream can be piped.
            OutputFormat::Json | OutputFormat::Yaml => match serde_json::to_string(&line) {
                Ok(json) => println!("{}", json),
                Err(e) => output::print_error(&e.to_string()),
            },
        }
    }
}

impl JobCatalogListener for PrintingListener {
    fn on_add_job(&self, spec: &JobSpec) -> ListenerResult {
        self.print(ChangeLine::Added { uri: spec.uri(), version: spec.version() });
        Ok(())
    }

    fn on_delete_job(&self, uri: &str, version: &str) -> ListenerResult {
        self.print(ChangeLine::Deleted { uri, version });
        Ok(())
    }

    fn on_update_job(&self, spec: &JobSpec) -> ListenerResult {
        self.print(ChangeLine::Updated { uri: spec.uri(), version: spec.version() });
        Ok(())
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: JobsCommands, settings: &Settings, format: OutputFormat) -> Result<()> {
    match cmd {
        JobsCommands::List => {
            let catalog = FsJobCatalog::new(settings.catalog()?)?;
            let jobs = catalog.get_jobs().await?;
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            output::print_list(&rows, format)?;
        }

        JobsCommands::Get { uri, show_secrets } => {
            let catalog = FsJobCatalog::new(settings.catalog()?)?;
            let spec = catalog
                .get_job_spec(&uri)
                .await
                .with_context(|| format!("Failed to load job spec {}", uri))?;
            let detail = JobDetail::new(&spec, show_secrets);

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Job: {}", detail.uri));
                    output::print_detail("Version", &detail.version);
                    output::print_detail("Description", &detail.description);
                    output::print_detail("Source", &detail.source_path);
                    output::print_header("Configuration");
                    for (key, value) in &detail.config {
                        output::print_detail(key, value);
                    }
                }
                _ => output::print_item(&detail, format)?,
            }
        }

        JobsCommands::Watch { interval } => {
            let config = settings
                .catalog()?
                .with_polling_interval(Duration::from_secs(interval.max(1)));
            let catalog = FsJobCatalog::new(config)?;

            catalog.add_listener(Arc::new(PrintingListener { format })).await;
            catalog.start().await?;
            if let OutputFormat::Table = format {
                output::print_info(&format!(
                    "Watching {} every {}s, Ctrl+C to stop",
                    catalog.root().display(),
                    interval.max(1)
                ));
            }

            tokio::signal::ctrl_c().await?;
            catalog.stop().await?;
            if let OutputFormat::Table = format {
                output::print_success("Stopped watching");
            }
        }
    }

    Ok(())
}
