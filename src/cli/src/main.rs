//! Gantry CLI - Command-line interface for Gantry job catalogs.
//!
//! Provides commands to inspect job specs and watch a job directory, and to
//! query flow execution statuses from a recorded state file.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{jobs, status, Settings};
use output::OutputFormat;

/// Gantry - Job Catalog and Flow Status CLI
#[derive(Parser)]
#[command(
    name = "gantry",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Gantry - Job Catalog and Flow Status CLI",
    long_about = "CLI tool for inspecting job specifications and flow execution statuses.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "GANTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Job configuration directory, overriding the configuration file
    #[arg(long, global = true, env = "GANTRY_JOB_CONFIG_DIR")]
    job_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job catalog operations
    #[command(subcommand)]
    Jobs(jobs::JobsCommands),

    /// Flow execution status queries
    #[command(subcommand)]
    Status(status::StatusCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = Settings::new(cli.config, cli.job_dir);
    let format = cli.output;

    let result = match cli.command {
        Commands::Jobs(cmd) => jobs::execute(cmd, &settings, format).await,
        Commands::Status(cmd) => status::execute(cmd, &settings, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
