//! Gantry Server - Main entry point
//!
//! Watches the job configuration directory and logs every catalog change
//! until interrupted.

use std::sync::Arc;

use gantry_core::{
    catalog::{FsJobCatalog, JobCatalogListener, JobSpec, ListenerResult},
    config::Config,
    telemetry::{self, SensitiveFieldRedactor, TelemetryConfig},
};

/// Logs catalog changes with sensitive configuration values redacted.
struct LoggingListener;

impl LoggingListener {
    fn log_spec(action: &str, spec: &JobSpec) {
        let redactor = SensitiveFieldRedactor::global();
        let config: Vec<String> = spec
            .config()
            .iter()
            .map(|(k, v)| format!("{}={}", k, redactor.redact(k, v)))
            .collect();

        tracing::info!(
            action,
            uri = %spec.uri(),
            version = %spec.version(),
            job_name = spec.job_name().unwrap_or_default(),
            config = ?config,
            "Job spec changed"
        );
    }
}

impl JobCatalogListener for LoggingListener {
    fn on_add_job(&self, spec: &JobSpec) -> ListenerResult {
        Self::log_spec("added", spec);
        Ok(())
    }

    fn on_delete_job(&self, uri: &str, version: &str) -> ListenerResult {
        tracing::info!(action = "deleted", uri, version, "Job spec changed");
        Ok(())
    }

    fn on_update_job(&self, spec: &JobSpec) -> ListenerResult {
        Self::log_spec("updated", spec);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("GANTRY_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    telemetry::init_telemetry(&TelemetryConfig::default().with_logging(config.logging.clone()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.catalog.job_config_dir.display(),
        interval = ?config.catalog.polling_interval,
        "Starting Gantry Server"
    );

    let catalog = FsJobCatalog::new(config.catalog.clone())?;
    catalog.add_listener(Arc::new(LoggingListener)).await;
    catalog.start().await?;

    shutdown_signal().await?;

    catalog.stop().await?;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    tracing::info!("Shutdown signal received");
    Ok(())
}
