//! Catalog subscribers and callback dispatch.
//!
//! The [`ListenerRegistry`] keeps subscribers in registration order. Each one
//! is held either strongly or weakly; weak entries whose target is gone, or
//! whose [`Liveness`] check fails, are pruned the next time an event is
//! dispatched. A listener that returns an error or panics is logged and
//! counted, and the remaining listeners still receive the event.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use super::spec::JobSpec;
use crate::error::ErrorCode;
use crate::telemetry::metric_names;

// ═══════════════════════════════════════════════════════════════════════════════
// Listener Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Listener rejected event: {0}")]
    Rejected(String),

    #[error("Listener panicked in {callback}: {message}")]
    Panicked {
        callback: &'static str,
        message: String,
    },
}

impl ListenerError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rejected(_) => ErrorCode::ListenerRejected,
            Self::Panicked { .. } => ErrorCode::ListenerPanicked,
        }
    }
}

pub type ListenerResult = Result<(), ListenerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Listener Traits
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives job additions, updates and removals from a catalog.
///
/// Callbacks run on the dispatching task and should return quickly.
pub trait JobCatalogListener: Send + Sync {
    fn on_add_job(&self, _spec: &JobSpec) -> ListenerResult {
        Ok(())
    }

    fn on_delete_job(&self, _uri: &str, _version: &str) -> ListenerResult {
        Ok(())
    }

    fn on_update_job(&self, _spec: &JobSpec) -> ListenerResult {
        Ok(())
    }
}

/// Extra reachability check for weakly registered listeners.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// Shared on/off switch implementing [`Liveness`].
#[derive(Debug, Clone)]
pub struct LivenessFlag(Arc<AtomicBool>);

impl LivenessFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Mark the owner unreachable; every registration sharing the flag stops
    /// receiving callbacks.
    pub fn revoke(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for LivenessFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness for LivenessFlag {
    fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    Added(JobSpec),
    Updated(JobSpec),
    Deleted { uri: String, version: String },
}

impl CatalogEvent {
    pub fn callback_name(&self) -> &'static str {
        match self {
            Self::Added(_) => "on_add_job",
            Self::Updated(_) => "on_update_job",
            Self::Deleted { .. } => "on_delete_job",
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::Added(spec) | Self::Updated(spec) => spec.uri(),
            Self::Deleted { uri, .. } => uri,
        }
    }

    pub fn deliver(&self, listener: &dyn JobCatalogListener) -> ListenerResult {
        match self {
            Self::Added(spec) => listener.on_add_job(spec),
            Self::Updated(spec) => listener.on_update_job(spec),
            Self::Deleted { uri, version } => listener.on_delete_job(uri, version),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

enum ListenerRef {
    Strong(Arc<dyn JobCatalogListener>),
    Weak {
        target: Weak<dyn JobCatalogListener>,
        liveness: Option<Arc<dyn Liveness>>,
    },
}

struct ListenerEntry {
    id: usize,
    listener: ListenerRef,
}

impl ListenerEntry {
    fn resolve(&self) -> Option<Arc<dyn JobCatalogListener>> {
        match &self.listener {
            ListenerRef::Strong(listener) => Some(listener.clone()),
            ListenerRef::Weak { target, liveness } => {
                let alive = liveness.as_ref().map_or(true, |l| l.is_alive());
                if alive {
                    target.upgrade()
                } else {
                    None
                }
            }
        }
    }
}

fn listener_id(listener: &Arc<dyn JobCatalogListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<ListenerEntry>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` strongly. Returns `false` if it was already present.
    pub fn add_listener(&self, listener: Arc<dyn JobCatalogListener>) -> bool {
        let id = listener_id(&listener);
        self.insert(ListenerEntry {
            id,
            listener: ListenerRef::Strong(listener),
        })
    }

    /// Register `listener` weakly. Returns `false` if it was already present.
    pub fn register_weak(
        &self,
        listener: &Arc<dyn JobCatalogListener>,
        liveness: Option<Arc<dyn Liveness>>,
    ) -> bool {
        self.insert(ListenerEntry {
            id: listener_id(listener),
            listener: ListenerRef::Weak {
                target: Arc::downgrade(listener),
                liveness,
            },
        })
    }

    /// Remove `listener`; returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn JobCatalogListener>) -> bool {
        let id = listener_id(listener);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        before != entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop weak entries that can no longer be reached.
    pub fn prune(&self) -> usize {
        self.live_targets().1
    }

    /// Deliver `event` to every reachable listener in registration order.
    pub fn broadcast(&self, event: &CatalogEvent) -> DispatchReport {
        let (targets, pruned) = self.live_targets();
        let mut report = DispatchReport {
            pruned,
            ..DispatchReport::default()
        };

        for listener in &targets {
            match dispatch(event, listener.as_ref()) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Deliver `event` to `listener` alone, with the same failure isolation
    /// as [`broadcast`](Self::broadcast).
    pub fn callback_one(
        &self,
        event: &CatalogEvent,
        listener: &Arc<dyn JobCatalogListener>,
    ) -> ListenerResult {
        dispatch(event, listener.as_ref())
    }

    fn insert(&self, entry: ListenerEntry) -> bool {
        let mut entries = self.entries.lock();
        // A dead weak entry may share its address with a new listener.
        entries.retain(|e| e.resolve().is_some());
        if entries.iter().any(|e| e.id == entry.id) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Snapshot reachable listeners under the lock; callers dispatch after
    /// it is released so listeners may re-enter the registry.
    fn live_targets(&self) -> (Vec<Arc<dyn JobCatalogListener>>, usize) {
        let mut entries = self.entries.lock();
        let mut targets = Vec::with_capacity(entries.len());
        let before = entries.len();

        entries.retain(|entry| match entry.resolve() {
            Some(listener) => {
                targets.push(listener);
                true
            }
            None => false,
        });

        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, "Pruned unreachable catalog listeners");
        }
        (targets, pruned)
    }
}

fn dispatch(event: &CatalogEvent, listener: &dyn JobCatalogListener) -> ListenerResult {
    let result = match panic::catch_unwind(AssertUnwindSafe(|| event.deliver(listener))) {
        Ok(result) => result,
        Err(payload) => Err(ListenerError::Panicked {
            callback: event.callback_name(),
            message: panic_message(payload.as_ref()),
        }),
    };

    if let Err(e) = &result {
        warn!(
            callback = event.callback_name(),
            uri = %event.uri(),
            error = %e,
            "Catalog listener failed"
        );
        counter!(metric_names::LISTENER_FAILURES, "callback" => event.callback_name()).increment(1);
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
