//! Telemetry: structured logging and metric emission.
//!
//! - **Logging**: Structured JSON/pretty logging with sensitive data redaction
//! - **Metrics**: catalog counters and gauges emitted through the `metrics`
//!   facade; no exporter is installed here, the embedding process picks one.
//!
//! # Example
//!
//! ```rust,no_run
//! use gantry_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};

use serde::Deserialize;

/// Metric names emitted by the job catalog.
pub mod metric_names {
    pub const JOBS_ADDED: &str = "gantry_catalog_jobs_added_total";
    pub const JOBS_UPDATED: &str = "gantry_catalog_jobs_updated_total";
    pub const JOBS_DELETED: &str = "gantry_catalog_jobs_deleted_total";
    pub const SCAN_FAILURES: &str = "gantry_catalog_scan_failures_total";
    pub const LISTENER_FAILURES: &str = "gantry_catalog_listener_failures_total";
    pub const JOBS: &str = "gantry_catalog_jobs";
}

/// Register descriptions for the catalog metrics with the installed recorder.
pub fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(metric_names::JOBS_ADDED, "Job specs added by change detection");
    describe_counter!(metric_names::JOBS_UPDATED, "Job specs updated by change detection");
    describe_counter!(metric_names::JOBS_DELETED, "Job specs deleted by change detection");
    describe_counter!(metric_names::SCAN_FAILURES, "Job directory scans that failed");
    describe_counter!(
        metric_names::LISTENER_FAILURES,
        "Catalog listener callbacks that returned an error or panicked"
    );
    describe_gauge!(metric_names::JOBS, "Job specs in the current catalog snapshot");
}

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfig {
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

fn default_service_name() -> String {
    "gantry".to_string()
}

fn default_environment() -> String {
    std::env::var("GANTRY_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize the telemetry stack. Call once at process startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.logging, &config.environment)?;
    describe_metrics();

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );
    Ok(())
}
