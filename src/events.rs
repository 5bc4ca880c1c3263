//! Run lifecycle notifications.
//!
//! Channel names are centralized so hosts that forward events (to a UI, a log
//! shipper) agree on them.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::Algorithm;
use crate::validation::ValidationErrors;

pub const EVENT_VALIDATION_FAILED: &str = "simulation-validation-failed";
pub const EVENT_RUN_STARTED: &str = "simulation-started";
pub const EVENT_CACHE_HIT: &str = "simulation-cache-hit";
pub const EVENT_WARMING_UP: &str = "simulation-warming-up";
pub const EVENT_RUN_COMPLETED: &str = "simulation-completed";
pub const EVENT_RUN_CANCELLED: &str = "simulation-cancelled";
pub const EVENT_RUN_FAILED: &str = "simulation-failed";
pub const EVENT_ARTIFACTS_READY: &str = "simulation-artifacts-ready";
pub const EVENT_HISTORY_DEGRADED: &str = "history-degraded";

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RunEvent {
    ValidationFailed { errors: ValidationErrors },
    Started { mode: String },
    CacheHit { key: String, cached_at_ms: i64 },
    WarmingUp { algorithm: Option<Algorithm>, attempt: u8 },
    Completed { mode: String, history_id: Option<String> },
    /// Informational; not an error.
    Cancelled,
    Failed { code: String, message: String },
    /// Deferred plots were merged into the current results.
    ArtifactsReady { ready: usize, pending: usize },
    /// History dropped older runs to fit the storage quota.
    HistoryDegraded { retained: usize },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::ValidationFailed { .. } => EVENT_VALIDATION_FAILED,
            RunEvent::Started { .. } => EVENT_RUN_STARTED,
            RunEvent::CacheHit { .. } => EVENT_CACHE_HIT,
            RunEvent::WarmingUp { .. } => EVENT_WARMING_UP,
            RunEvent::Completed { .. } => EVENT_RUN_COMPLETED,
            RunEvent::Cancelled => EVENT_RUN_CANCELLED,
            RunEvent::Failed { .. } => EVENT_RUN_FAILED,
            RunEvent::ArtifactsReady { .. } => EVENT_ARTIFACTS_READY,
            RunEvent::HistoryDegraded { .. } => EVENT_HISTORY_DEGRADED,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RunEvent::ValidationFailed { .. } | RunEvent::Failed { .. })
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Send to current subscribers. Having none is not an error.
    pub fn emit_or_log(&self, event: RunEvent) {
        let name = event.name();
        if event.is_error() {
            tracing::warn!(target = "simlab", event = name, payload = ?event, "emit");
        } else {
            tracing::debug!(target = "simlab", event = name, "emit");
        }
        if self.tx.send(event).is_err() {
            tracing::trace!(target = "simlab", event = name, "no event subscribers");
        }
    }
}
