//! Integration tests for the filesystem job catalog.
//!
//! Tests cover:
//! - Bulk and point queries against a job directory
//! - Listener registration, replay, removal and weak subscriptions
//! - Change detection for job files and global configuration files
//! - Failure isolation for listeners and scans
//! - Lifecycle of the background poller

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gantry_core::catalog::{
    CatalogError, CatalogEvent, CatalogState, FileEntry, FileSystem, FsJobCatalog,
    JobCatalogListener, JobConfig, JobSpec, ListenerError, ListenerResult, LivenessFlag,
    LocalFileSystem,
};
use gantry_core::config::CatalogConfig;
use parking_lot::Mutex;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn clear(&self) {
        self.events.lock().clear();
    }
}

impl JobCatalogListener for Recorder {
    fn on_add_job(&self, spec: &JobSpec) -> ListenerResult {
        self.events.lock().push(format!("add:{}", spec.uri()));
        Ok(())
    }

    fn on_delete_job(&self, uri: &str, version: &str) -> ListenerResult {
        self.events.lock().push(format!("delete:{}@{}", uri, version));
        Ok(())
    }

    fn on_update_job(&self, spec: &JobSpec) -> ListenerResult {
        self.events.lock().push(format!("update:{}", spec.uri()));
        Ok(())
    }
}

struct Panicker;

impl JobCatalogListener for Panicker {
    fn on_update_job(&self, _spec: &JobSpec) -> ListenerResult {
        panic!("update handler failed");
    }
}

/// Local file system whose recursive listing can be made to fail.
#[derive(Debug, Default)]
struct FlakyFileSystem {
    failing: AtomicBool,
}

impl FileSystem for FlakyFileSystem {
    fn list_files(&self, root: &Path) -> io::Result<Vec<FileEntry>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "storage offline"));
        }
        LocalFileSystem.list_files(root)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<FileEntry>> {
        LocalFileSystem.list_dir(dir)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        LocalFileSystem.read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        LocalFileSystem.is_file(path)
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Two jobs: `a.pull` and `sub/b.pull`.
fn job_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.pull", "job.name=a\njob.version=2\n");
    write(dir.path(), "sub/b.pull", "job.name=b\n");
    dir
}

/// Catalog whose background poller effectively never fires; tests drive
/// change detection with `poll_now`.
fn catalog(dir: &TempDir) -> FsJobCatalog {
    FsJobCatalog::new(
        CatalogConfig::new(dir.path()).with_polling_interval(Duration::from_secs(3600)),
    )
    .unwrap()
}

fn uris(jobs: &[JobSpec]) -> Vec<&str> {
    jobs.iter().map(|j| j.uri()).collect()
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_get_jobs_returns_one_spec_per_file() {
    let dir = job_dir();
    write(dir.path(), "README.md", "not a job");
    let catalog = catalog(&dir);

    let jobs = catalog.get_jobs().await.unwrap();
    assert_eq!(uris(&jobs), vec!["a.pull", "sub/b.pull"]);
    assert_eq!(jobs[0].version(), "2");
    assert_eq!(jobs[1].version(), "1");
    assert_eq!(jobs[1].job_name(), Some("b"));
    assert_eq!(catalog.snapshot().len(), 2);
}

#[tokio::test]
async fn test_get_jobs_empty_and_missing_root() {
    let dir = TempDir::new().unwrap();
    assert!(catalog(&dir).get_jobs().await.unwrap().is_empty());

    let missing = FsJobCatalog::new(CatalogConfig::new(dir.path().join("absent"))).unwrap();
    assert!(missing.get_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_job_spec() {
    let dir = job_dir();
    write(dir.path(), "common.properties", "owner=data-eng\n");
    let catalog = catalog(&dir);

    let spec = catalog.get_job_spec("sub/b.pull").await.unwrap();
    assert_eq!(spec.uri(), "sub/b.pull");
    assert_eq!(spec.config().get("owner"), Some("data-eng"));

    for uri in ["missing.pull", "../a.pull", "/etc/hosts", "common.properties"] {
        let err = catalog.get_job_spec(uri).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)), "{uri}: {err}");
    }
}

#[tokio::test]
async fn test_get_job_spec_decode_failure() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bad.json", "{ \"job\": ");
    let err = catalog(&dir).get_job_spec("bad.json").await.unwrap_err();
    assert!(matches!(err, CatalogError::Decode { .. }));
}

#[tokio::test]
async fn test_custom_structured_extension() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "ingest.conf", "[job]\nname = \"ingest\"\nversion = 4\n");
    let catalog = FsJobCatalog::new(
        CatalogConfig::new(dir.path()).with_structured_extensions("json,conf:toml"),
    )
    .unwrap();

    let spec = catalog.get_job_spec("ingest.conf").await.unwrap();
    assert_eq!(spec.job_name(), Some("ingest"));
    assert_eq!(spec.version(), "4");
}

#[test]
fn test_unknown_structured_format_is_rejected() {
    let result = FsJobCatalog::new(CatalogConfig::new("/jobs").with_structured_extensions("conf"));
    assert!(matches!(result, Err(CatalogError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_system_config_is_the_base() {
    let dir = job_dir();
    write(dir.path(), "sub/team.properties", "owner=team\n");
    let catalog = FsJobCatalog::builder(CatalogConfig::new(dir.path()))
        .system_config(JobConfig::new().with("owner", "platform").with("env", "prod"))
        .build()
        .unwrap();

    let jobs = catalog.get_jobs().await.unwrap();
    assert_eq!(jobs[0].config().get("owner"), Some("platform"));
    assert_eq!(jobs[1].config().get("owner"), Some("team"));
    assert_eq!(jobs[1].config().get("env"), Some("prod"));
}

// ============================================================================
// Listeners
// ============================================================================

#[tokio::test]
async fn test_add_listener_replays_to_new_listener_only() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    catalog.add_listener(first.clone()).await;
    assert_eq!(first.events(), vec!["add:a.pull", "add:sub/b.pull"]);

    catalog.add_listener(second.clone()).await;
    assert_eq!(second.events(), vec!["add:a.pull", "add:sub/b.pull"]);
    assert_eq!(first.events().len(), 2);
    assert_eq!(catalog.listener_count(), 2);
}

#[tokio::test]
async fn test_add_same_listener_twice_does_not_replay() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn JobCatalogListener> = recorder.clone();

    catalog.add_listener(listener.clone()).await;
    catalog.add_listener(listener).await;
    assert_eq!(recorder.events().len(), 2);
    assert_eq!(catalog.listener_count(), 1);
}

#[tokio::test]
async fn test_modified_file_emits_exactly_one_update() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    catalog.add_listener(recorder.clone()).await;
    catalog.start().await.unwrap();
    recorder.clear();

    write(dir.path(), "a.pull", "job.name=a\njob.version=3\njob.description=changed\n");
    let events = catalog.poll_now().await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(recorder.events(), vec!["update:a.pull"]);
    assert!(catalog.poll_now().await.unwrap().is_empty());

    let jobs = catalog.get_jobs().await.unwrap();
    assert_eq!(jobs[0].version(), "3");
    assert_eq!(jobs[0].description(), "changed");

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_created_and_deleted_files() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    write(dir.path(), "c.job", "job.name=c\n");
    std::fs::remove_file(dir.path().join("a.pull")).unwrap();
    catalog.poll_now().await.unwrap();

    assert_eq!(recorder.events(), vec!["delete:a.pull@2", "add:c.job"]);
    assert_eq!(uris(&catalog.snapshot()), vec!["c.job", "sub/b.pull"]);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_created_file_is_added_after_get_jobs() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    write(dir.path(), "c.pull", "job.name=c\njob.version=5\n");
    catalog.get_jobs().await.unwrap();
    catalog.poll_now().await.unwrap();
    assert_eq!(recorder.events(), vec!["add:c.pull"]);

    recorder.clear();
    std::fs::remove_file(dir.path().join("c.pull")).unwrap();
    catalog.get_jobs().await.unwrap();
    catalog.poll_now().await.unwrap();
    assert_eq!(recorder.events(), vec!["delete:c.pull@5"]);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_created_file_is_added_after_listener_registration() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let early = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(early.clone()).await;
    early.clear();

    write(dir.path(), "c.pull", "job.name=c\n");
    let late = Arc::new(Recorder::default());
    catalog.add_listener(late.clone()).await;
    assert!(late.events().contains(&"add:c.pull".to_string()));

    catalog.poll_now().await.unwrap();
    assert_eq!(early.events(), vec!["add:c.pull"]);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_global_change_updates_jobs_below_it() {
    let dir = job_dir();
    write(dir.path(), "sub/c.pull", "job.name=c\n");
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    write(dir.path(), "sub/shared.properties", "retries=5\n");
    catalog.poll_now().await.unwrap();

    assert_eq!(recorder.events(), vec!["update:sub/b.pull", "update:sub/c.pull"]);
    let b = catalog.get_job_spec("sub/b.pull").await.unwrap();
    assert_eq!(b.config().get("retries"), Some("5"));

    recorder.clear();
    std::fs::remove_file(dir.path().join("sub/shared.properties")).unwrap();
    catalog.poll_now().await.unwrap();
    assert_eq!(recorder.events(), vec!["update:sub/b.pull", "update:sub/c.pull"]);
    assert_eq!(catalog.snapshot()[1].config().get("retries"), None);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_removed_listener_receives_nothing() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn JobCatalogListener> = recorder.clone();
    catalog.start().await.unwrap();
    catalog.add_listener(listener.clone()).await;

    catalog.remove_listener(&listener);
    catalog.remove_listener(&listener);
    recorder.clear();

    write(dir.path(), "a.pull", "job.name=a\njob.version=9\n");
    catalog.poll_now().await.unwrap();
    assert!(recorder.events().is_empty());
    assert_eq!(catalog.listener_count(), 0);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_weak_listener_stops_after_drop() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    catalog.start().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn JobCatalogListener> = recorder.clone();
    catalog.register_weak_listener(&listener).await;
    assert_eq!(recorder.events().len(), 2);

    drop(listener);
    drop(recorder);
    write(dir.path(), "a.pull", "job.name=a\njob.version=10\n");
    catalog.poll_now().await.unwrap();
    assert_eq!(catalog.listener_count(), 0);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_weak_listener_stops_when_liveness_revoked() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    catalog.start().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn JobCatalogListener> = recorder.clone();
    let flag = LivenessFlag::new();
    catalog
        .register_weak_listener_with(&listener, Arc::new(flag.clone()))
        .await;
    recorder.clear();

    flag.revoke();
    write(dir.path(), "a.pull", "job.name=a\njob.version=11\n");
    catalog.poll_now().await.unwrap();
    assert!(recorder.events().is_empty());

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_listener_does_not_block_others() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(Arc::new(Panicker)).await;
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    write(dir.path(), "a.pull", "job.name=a\njob.version=12\n");
    catalog.poll_now().await.unwrap();
    assert_eq!(recorder.events(), vec!["update:a.pull"]);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_listener_failing_during_replay_stays_registered() {
    struct RejectsAdds;

    impl JobCatalogListener for RejectsAdds {
        fn on_add_job(&self, _spec: &JobSpec) -> ListenerResult {
            Err(ListenerError::rejected("not ready"))
        }
    }

    let dir = job_dir();
    let catalog = catalog(&dir);
    catalog.add_listener(Arc::new(RejectsAdds)).await;
    assert_eq!(catalog.listener_count(), 1);
}

// ============================================================================
// Failures and lifecycle
// ============================================================================

#[tokio::test]
async fn test_failed_scan_keeps_snapshot() {
    let dir = job_dir();
    let fs = Arc::new(FlakyFileSystem::default());
    let catalog = FsJobCatalog::builder(
        CatalogConfig::new(dir.path()).with_polling_interval(Duration::from_secs(3600)),
    )
    .file_system(fs.clone())
    .build()
    .unwrap();
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    fs.failing.store(true, Ordering::SeqCst);
    write(dir.path(), "c.pull", "job.name=c\n");
    assert!(matches!(catalog.poll_now().await, Err(CatalogError::Io { .. })));
    assert_eq!(catalog.snapshot().len(), 2);
    assert!(recorder.events().is_empty());

    fs.failing.store(false, Ordering::SeqCst);
    catalog.poll_now().await.unwrap();
    assert_eq!(recorder.events(), vec!["add:c.pull"]);

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_events_after_stop() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    catalog.stop().await.unwrap();
    assert_eq!(catalog.state(), CatalogState::Stopped);

    write(dir.path(), "a.pull", "job.name=a\njob.version=13\n");
    assert!(catalog.poll_now().await.unwrap().is_empty());
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn test_background_poller_delivers_changes() {
    let dir = job_dir();
    let catalog = FsJobCatalog::new(
        CatalogConfig::new(dir.path()).with_polling_interval(Duration::from_millis(50)),
    )
    .unwrap();
    let recorder = Arc::new(Recorder::default());
    catalog.start().await.unwrap();
    catalog.add_listener(recorder.clone()).await;
    recorder.clear();

    write(dir.path(), "d.pull", "job.name=d\n");

    let mut delivered = false;
    for _ in 0..100 {
        if recorder.events().contains(&"add:d.pull".to_string()) {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "poller never reported d.pull");

    catalog.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_ignores_existing_files() {
    let dir = job_dir();
    let catalog = catalog(&dir);
    catalog.start().await.unwrap();

    let events = catalog.poll_now().await.unwrap();
    assert!(events.is_empty());
    assert_eq!(catalog.snapshot().len(), 2);

    catalog.stop().await.unwrap();
}

#[test]
fn test_event_callback_names() {
    let event = CatalogEvent::Deleted {
        uri: "a.pull".to_string(),
        version: "1".to_string(),
    };
    assert_eq!(event.callback_name(), "on_delete_job");
    assert_eq!(event.uri(), "a.pull");
}
