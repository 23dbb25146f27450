//! Polling change detection over file listings.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::fs::{FileEntry, FileSignature};

/// A difference between two consecutive listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
        }
    }
}

/// Remembers the last observed listing and reports what changed since.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    observed: BTreeMap<PathBuf, FileSignature>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `listing` without reporting anything.
    pub fn baseline(&mut self, listing: &[FileEntry]) {
        self.observed = Self::index(listing);
    }

    /// Compare `listing` with the recorded one, record it, and return one
    /// change per differing path, ordered by path.
    pub fn diff(&mut self, listing: &[FileEntry]) -> Vec<FileChange> {
        let current = Self::index(listing);
        let mut changes = Vec::new();

        for (path, signature) in &current {
            match self.observed.get(path) {
                None => changes.push(FileChange::Created(path.clone())),
                Some(previous) if previous != signature => {
                    changes.push(FileChange::Modified(path.clone()))
                }
                Some(_) => {}
            }
        }
        for path in self.observed.keys() {
            if !current.contains_key(path) {
                changes.push(FileChange::Deleted(path.clone()));
            }
        }

        changes.sort_by(|a, b| a.path().cmp(b.path()));
        self.observed = current;
        changes
    }

    pub fn observed_len(&self) -> usize {
        self.observed.len()
    }

    fn index(listing: &[FileEntry]) -> BTreeMap<PathBuf, FileSignature> {
        listing
            .iter()
            .map(|entry| (entry.path.clone(), entry.signature))
            .collect()
    }
}

/// Run `tick` every `interval` until `shutdown` turns true or its sender is
/// dropped. A tick in progress always runs to completion.
pub fn spawn_poll_loop<F, Fut>(
    name: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(poller = %name, interval = ?interval, "Change detector started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(poller = %name, "Change detector shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    tick().await;
                }
            }
        }

        tracing::info!(poller = %name, "Change detector stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;

    fn entry(path: &str, len: u64) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            signature: FileSignature {
                modified: Some(SystemTime::UNIX_EPOCH),
                len,
            },
        }
    }

    #[test]
    fn test_baseline_emits_nothing() {
        let mut detector = ChangeDetector::new();
        detector.baseline(&[entry("/j/a.pull", 1)]);
        assert!(detector.diff(&[entry("/j/a.pull", 1)]).is_empty());
        assert_eq!(detector.observed_len(), 1);
    }

    #[test]
    fn test_diff_reports_each_kind_in_path_order() {
        let mut detector = ChangeDetector::new();
        detector.baseline(&[entry("/j/a.pull", 1), entry("/j/b.pull", 1), entry("/j/c.pull", 1)]);

        let changes = detector.diff(&[entry("/j/a.pull", 2), entry("/j/c.pull", 1), entry("/j/d.pull", 1)]);
        assert_eq!(
            changes,
            vec![
                FileChange::Modified(PathBuf::from("/j/a.pull")),
                FileChange::Deleted(PathBuf::from("/j/b.pull")),
                FileChange::Created(PathBuf::from("/j/d.pull")),
            ]
        );

        // Recorded listing advanced.
        assert!(detector.diff(&[entry("/j/a.pull", 2), entry("/j/c.pull", 1), entry("/j/d.pull", 1)]).is_empty());
    }

    #[tokio::test]
    async fn test_poll_loop_stops_on_signal() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = ticks.clone();
        let handle = spawn_poll_loop("test".to_string(), Duration::from_millis(10), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_poll_loop_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_poll_loop("test".to_string(), Duration::from_secs(60), rx, || async {});
        drop(tx);
        handle.await.unwrap();
    }
}
