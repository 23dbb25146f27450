//! Filesystem-backed job catalog.
//!
//! [`FsJobCatalog`] keeps a snapshot of every job file below a root
//! directory, answers point and bulk queries, and tells registered
//! [`JobCatalogListener`]s when job files appear, change or disappear.
//!
//! ```text
//! ┌──────────────┐ listing ┌────────────────┐ changes ┌────────────────┐
//! │  FileSystem  │────────▶│ ChangeDetector │────────▶│ SpecFileLoader │
//! └──────────────┘         └────────────────┘         └───────┬────────┘
//!                                                             │ JobSpec
//!                        ┌──────────────────┐  events ┌───────▼────────┐
//!                        │ ListenerRegistry │◀────────│    snapshot    │
//!                        └──────────────────┘         └────────────────┘
//! ```
//!
//! Lock order is scan lock, then dispatch lock. Events are delivered while
//! holding only the dispatch lock, so deliveries happen in scan order and
//! never overlap.

pub mod decoder;
pub mod detector;
pub mod fs;
pub mod listeners;
pub mod loader;
pub mod spec;

pub use decoder::{ConfigDecoder, DecodeError, DocumentFormat, FormatDecoder};
pub use detector::{ChangeDetector, FileChange};
pub use fs::{FileEntry, FileSignature, FileSystem, LocalFileSystem};
pub use listeners::{
    CatalogEvent, DispatchReport, JobCatalogListener, ListenerError, ListenerRegistry,
    ListenerResult, Liveness, LivenessFlag,
};
pub use loader::{FileKind, SpecFileLoader};
pub use spec::{JobConfig, JobSpec, LoadedConfig, SpecConverter, DEFAULT_JOB_VERSION};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::error::ErrorCode;
use crate::telemetry::metric_names;

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Job spec not found: {0}")]
    NotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode {}: {details}", path.display())]
    Decode { path: PathBuf, details: String },

    #[error("Invalid catalog configuration: {0}")]
    InvalidConfig(String),

    #[error("Catalog task failed: {0}")]
    TaskFailed(String),
}

impl CatalogError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::JobSpecNotFound,
            Self::Io { .. } => ErrorCode::CatalogIoFailed,
            Self::Decode { .. } => ErrorCode::JobSpecDecodeFailed,
            Self::InvalidConfig(_) => ErrorCode::InvalidCatalogConfig,
            Self::TaskFailed(_) => ErrorCode::CatalogTaskFailed,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of the background change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for CatalogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`FsJobCatalog`] with pluggable storage and decoding.
pub struct FsJobCatalogBuilder {
    config: CatalogConfig,
    fs: Option<Arc<dyn FileSystem>>,
    decoder: Option<Arc<dyn ConfigDecoder>>,
    system_config: JobConfig,
}

impl FsJobCatalogBuilder {
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn ConfigDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Base configuration every job file is merged over.
    pub fn system_config(mut self, system_config: JobConfig) -> Self {
        self.system_config = system_config;
        self
    }

    pub fn build(self) -> Result<FsJobCatalog, CatalogError> {
        self.config.validate()?;

        let fs = self.fs.unwrap_or_else(|| Arc::new(LocalFileSystem));
        let decoder = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(FormatDecoder::new(self.config.structured_formats()?)),
        };
        let loader = SpecFileLoader::new(&self.config, fs, decoder);
        let converter = SpecConverter::new(self.config.job_config_dir.clone());

        Ok(FsJobCatalog {
            inner: Arc::new(CatalogInner {
                config: self.config,
                sys_config: self.system_config,
                loader,
                converter,
                listeners: ListenerRegistry::new(),
                snapshot: RwLock::new(Arc::new(Vec::new())),
                scan: Mutex::new(ScanState::default()),
                dispatch: Mutex::new(()),
                state: RwLock::new(CatalogState::Stopped),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FsJobCatalog
// ═══════════════════════════════════════════════════════════════════════════════

struct CatalogInner {
    config: CatalogConfig,
    sys_config: JobConfig,
    loader: SpecFileLoader,
    converter: SpecConverter,
    listeners: ListenerRegistry,
    snapshot: RwLock<Arc<Vec<JobSpec>>>,
    scan: Mutex<ScanState>,
    dispatch: Mutex<()>,
    state: RwLock<CatalogState>,
}

/// What change detection has seen and told listeners about. Only
/// `initialize` and `poll` move it forward; queries that refresh the
/// snapshot leave it alone.
#[derive(Default)]
struct ScanState {
    detector: ChangeDetector,
    delivered: BTreeMap<String, JobSpec>,
}

impl ScanState {
    fn apply(&mut self, events: &[CatalogEvent]) {
        for event in events {
            match event {
                CatalogEvent::Added(spec) | CatalogEvent::Updated(spec) => {
                    self.delivered.insert(spec.uri().to_string(), spec.clone());
                }
                CatalogEvent::Deleted { uri, .. } => {
                    self.delivered.remove(uri);
                }
            }
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// Job catalog over a directory of job files.
pub struct FsJobCatalog {
    inner: Arc<CatalogInner>,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for FsJobCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsJobCatalog")
            .field("root", &self.inner.config.job_config_dir)
            .field("state", &self.state())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl FsJobCatalog {
    pub fn builder(config: CatalogConfig) -> FsJobCatalogBuilder {
        FsJobCatalogBuilder {
            config,
            fs: None,
            decoder: None,
            system_config: JobConfig::new(),
        }
    }

    /// Catalog over the local file system with the default decoder.
    pub fn new(config: CatalogConfig) -> Result<Self, CatalogError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.job_config_dir
    }

    pub fn state(&self) -> CatalogState {
        *self.inner.state.read()
    }

    /// Load every job file, publish the result as the new snapshot and
    /// return it ordered by uri.
    pub async fn get_jobs(&self) -> Result<Vec<JobSpec>, CatalogError> {
        let _scan = self.inner.scan.lock().await;
        let jobs = self.inner.reload_all().await?;
        self.inner.publish(jobs.clone());
        Ok(jobs)
    }

    /// Load the job file addressed by `uri`.
    pub async fn get_job_spec(&self, uri: &str) -> Result<JobSpec, CatalogError> {
        let _scan = self.inner.scan.lock().await;

        let path = self
            .inner
            .converter
            .resolve(uri)
            .filter(|p| self.inner.loader.is_job_file(p))
            .ok_or_else(|| CatalogError::NotFound(uri.to_string()))?;

        let uri = uri.to_string();
        self.inner
            .blocking(move |inner| {
                if !inner.loader.file_system().is_file(&path) {
                    return Err(CatalogError::NotFound(uri));
                }
                let loaded = inner.loader.load_file(&path, &inner.sys_config, true)?;
                Ok(inner.converter.convert(loaded))
            })
            .await
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<Vec<JobSpec>> {
        self.inner.snapshot.read().clone()
    }

    /// Register `listener` and replay an add for every current job to it.
    /// Registering the same listener twice does nothing.
    pub async fn add_listener(&self, listener: Arc<dyn JobCatalogListener>) {
        let registry = &self.inner.listeners;
        self.register_and_replay(&listener, || registry.add_listener(listener.clone()))
            .await;
    }

    /// Like [`add_listener`](Self::add_listener), but the catalog only keeps
    /// a weak reference.
    pub async fn register_weak_listener(&self, listener: &Arc<dyn JobCatalogListener>) {
        let registry = &self.inner.listeners;
        self.register_and_replay(listener, || registry.register_weak(listener, None))
            .await;
    }

    /// Weak registration that also stops once `liveness` reports false.
    pub async fn register_weak_listener_with(
        &self,
        listener: &Arc<dyn JobCatalogListener>,
        liveness: Arc<dyn Liveness>,
    ) {
        let registry = &self.inner.listeners;
        self.register_and_replay(listener, || {
            registry.register_weak(listener, Some(liveness.clone()))
        })
        .await;
    }

    pub fn remove_listener(&self, listener: &Arc<dyn JobCatalogListener>) {
        if self.inner.listeners.remove_listener(listener) {
            debug!("Catalog listener removed");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    async fn register_and_replay<F>(&self, listener: &Arc<dyn JobCatalogListener>, register: F)
    where
        F: FnOnce() -> bool,
    {
        let scan = self.inner.scan.lock().await;
        let jobs = match self.inner.reload_all().await {
            Ok(jobs) => {
                self.inner.publish(jobs.clone());
                Arc::new(jobs)
            }
            Err(e) => {
                warn!(error = %e, "Reload failed, replaying last snapshot");
                self.snapshot()
            }
        };

        // Registering under the dispatch lock keeps earlier broadcasts away
        // from the new listener and later ones behind its replay.
        let _dispatch = self.inner.dispatch.lock().await;
        drop(scan);
        if !register() {
            debug!("Catalog listener already registered");
            return;
        }

        let mut failed = 0usize;
        for spec in jobs.iter() {
            let event = CatalogEvent::Added(spec.clone());
            if self.inner.listeners.callback_one(&event, listener).is_err() {
                failed += 1;
            }
        }
        debug!(replayed = jobs.len(), failed, "Catalog listener registered");
    }

    /// Load the initial snapshot and start polling for changes. Files present
    /// now produce no events. Does nothing unless stopped.
    pub async fn start(&self) -> Result<(), CatalogError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.inner.transition(CatalogState::Stopped, CatalogState::Starting) {
            debug!(state = %self.state(), "Catalog start ignored");
            return Ok(());
        }

        if let Err(e) = self.inner.initialize().await {
            self.inner.set_state(CatalogState::Stopped);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        self.inner.set_state(CatalogState::Running);
        let task = detector::spawn_poll_loop(
            self.root().display().to_string(),
            self.inner.config.polling_interval,
            shutdown_rx,
            move || {
                let inner = Arc::clone(&inner);
                async move {
                    // Failures are logged inside poll.
                    let _ = inner.poll().await;
                }
            },
        );

        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.task = Some(task);
        info!(root = %self.root().display(), jobs = self.snapshot().len(), "Job catalog started");
        Ok(())
    }

    /// Stop polling. No events are delivered once this returns. Does nothing
    /// unless running.
    pub async fn stop(&self) -> Result<(), CatalogError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.inner.transition(CatalogState::Running, CatalogState::Stopping) {
            debug!(state = %self.state(), "Catalog stop ignored");
            return Ok(());
        }

        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        let joined = match lifecycle.task.take() {
            Some(task) => task
                .await
                .map_err(|e| CatalogError::TaskFailed(e.to_string())),
            None => Ok(()),
        };

        // Wait out any delivery started by poll_now on another task.
        let _dispatch = self.inner.dispatch.lock().await;
        self.inner.set_state(CatalogState::Stopped);
        info!(root = %self.root().display(), "Job catalog stopped");
        joined
    }

    /// Run one change-detection pass now and return the delivered events.
    /// Does nothing unless running.
    pub async fn poll_now(&self) -> Result<Vec<CatalogEvent>, CatalogError> {
        self.inner.poll().await
    }
}

impl CatalogInner {
    fn transition(&self, from: CatalogState, to: CatalogState) -> bool {
        let mut state = self.state.write();
        if *state != from {
            return false;
        }
        *state = to;
        debug!(from = %from, to = %to, "Catalog state transition");
        true
    }

    fn is_running(&self) -> bool {
        *self.state.read() == CatalogState::Running
    }

    fn set_state(&self, to: CatalogState) {
        let mut state = self.state.write();
        debug!(from = %*state, to = %to, "Catalog state transition");
        *state = to;
    }

    fn publish(&self, jobs: Vec<JobSpec>) {
        gauge!(metric_names::JOBS).set(jobs.len() as f64);
        *self.snapshot.write() = Arc::new(jobs);
    }

    async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&CatalogInner) -> Result<T, CatalogError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| CatalogError::TaskFailed(e.to_string()))?
    }

    async fn reload_all(self: &Arc<Self>) -> Result<Vec<JobSpec>, CatalogError> {
        self.blocking(|inner| {
            let loaded =
                inner
                    .loader
                    .load_recursively(inner.loader.root(), &inner.sys_config, true)?;
            let mut jobs: Vec<JobSpec> = loaded
                .into_iter()
                .map(|l| inner.converter.convert(l))
                .collect();
            jobs.sort_by(|a, b| a.uri().cmp(b.uri()));
            Ok(jobs)
        })
        .await
    }

    async fn list(self: &Arc<Self>) -> Result<Vec<FileEntry>, CatalogError> {
        self.blocking(|inner| {
            inner
                .loader
                .list_recognized()
                .map_err(|source| CatalogError::Io {
                    path: inner.loader.root().to_path_buf(),
                    source,
                })
        })
        .await
    }

    async fn initialize(self: &Arc<Self>) -> Result<(), CatalogError> {
        let mut scan = self.scan.lock().await;
        let listing = self.list().await?;
        let jobs = self.reload_all().await?;
        scan.detector.baseline(&listing);
        scan.delivered = jobs
            .iter()
            .map(|spec| (spec.uri().to_string(), spec.clone()))
            .collect();
        self.publish(jobs);
        Ok(())
    }

    async fn poll(self: &Arc<Self>) -> Result<Vec<CatalogEvent>, CatalogError> {
        if !self.is_running() {
            debug!("Catalog not running, poll skipped");
            return Ok(Vec::new());
        }

        let mut scan = self.scan.lock().await;
        let listing = match self.list().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "Job directory scan failed, keeping previous snapshot");
                counter!(metric_names::SCAN_FAILURES).increment(1);
                return Err(e);
            }
        };

        let mut next = scan.detector.clone();
        let changes = next.diff(&listing);
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let delivered = scan.delivered.clone();
        let events = self
            .blocking(move |inner| Ok(inner.resolve_changes(&changes, &delivered)))
            .await?;
        scan.detector = next;
        scan.apply(&events);

        let mut jobs: BTreeMap<String, JobSpec> = self
            .snapshot
            .read()
            .iter()
            .map(|spec| (spec.uri().to_string(), spec.clone()))
            .collect();
        for event in &events {
            match event {
                CatalogEvent::Added(spec) | CatalogEvent::Updated(spec) => {
                    jobs.insert(spec.uri().to_string(), spec.clone());
                }
                CatalogEvent::Deleted { uri, .. } => {
                    jobs.remove(uri);
                }
            }
        }
        self.publish(jobs.into_values().collect());

        let _dispatch = self.dispatch.lock().await;
        drop(scan);
        if !self.is_running() {
            debug!(events = events.len(), "Catalog stopping, events not delivered");
            return Ok(Vec::new());
        }

        for event in &events {
            let report = self.listeners.broadcast(event);
            let metric = match event {
                CatalogEvent::Added(_) => metric_names::JOBS_ADDED,
                CatalogEvent::Updated(_) => metric_names::JOBS_UPDATED,
                CatalogEvent::Deleted { .. } => metric_names::JOBS_DELETED,
            };
            counter!(metric).increment(1);
            info!(
                callback = event.callback_name(),
                uri = %event.uri(),
                delivered = report.delivered,
                failed = report.failed,
                "Job catalog change"
            );
        }
        Ok(events)
    }

    /// Turn file changes into catalog events. Job files come first, in path
    /// order; then every job below a changed global file is reloaded.
    /// `known` holds the specs listeners were last told about.
    fn resolve_changes(
        &self,
        changes: &[FileChange],
        known: &BTreeMap<String, JobSpec>,
    ) -> Vec<CatalogEvent> {
        let mut events = Vec::new();
        let mut touched: BTreeSet<PathBuf> = BTreeSet::new();
        let mut global_dirs: BTreeSet<PathBuf> = BTreeSet::new();

        for change in changes {
            let path = change.path();
            match self.loader.file_kind(path) {
                Some(FileKind::Job) => {}
                Some(FileKind::Global) => {
                    if let Some(dir) = path.parent() {
                        global_dirs.insert(dir.to_path_buf());
                    }
                    continue;
                }
                None => continue,
            }
            touched.insert(path.to_path_buf());

            match change {
                FileChange::Created(_) | FileChange::Modified(_) => {
                    match self.loader.load_file(path, &self.sys_config, true) {
                        Ok(loaded) => {
                            let spec = self.converter.convert(loaded);
                            // A modified file whose creation failed to load
                            // is new to listeners.
                            let created = matches!(change, FileChange::Created(_))
                                || !known.contains_key(spec.uri());
                            if created {
                                events.push(CatalogEvent::Added(spec));
                            } else {
                                events.push(CatalogEvent::Updated(spec));
                            }
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to load changed job file");
                        }
                    }
                }
                FileChange::Deleted(_) => {
                    let uri = self.converter.uri_for(path);
                    let version = known
                        .get(&uri)
                        .map(|spec| spec.version().to_string())
                        .unwrap_or_else(|| DEFAULT_JOB_VERSION.to_string());
                    events.push(CatalogEvent::Deleted { uri, version });
                }
            }
        }

        for dir in &global_dirs {
            let reloaded = match self.loader.load_recursively(dir, &self.sys_config, true) {
                Ok(reloaded) => reloaded,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to reload jobs after global change");
                    continue;
                }
            };
            for loaded in reloaded {
                if !touched.insert(loaded.path.clone()) {
                    continue;
                }
                let spec = self.converter.convert(loaded);
                if known.contains_key(spec.uri()) {
                    events.push(CatalogEvent::Updated(spec));
                } else {
                    events.push(CatalogEvent::Added(spec));
                }
            }
        }
        events
    }
}
