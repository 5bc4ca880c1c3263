//! Resume marker for a run that outlives its view.
//!
//! When a run starts, a small marker is written to the shared store. A
//! process that comes back (or a view that becomes visible again) can read it
//! and show an estimated loading screen instead of the configuration form.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::limits::CRAWL_CEILING_PERCENT;
use crate::config::paths::SESSION_MARKER_KEY;
use crate::config::timeouts::RESUME_EXPECTED_RUN_MS;
use crate::progress::Stage;
use crate::result_cache::Fingerprint;
use crate::storage::KvStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMarker {
    pub started_at_ms: i64,
    pub fingerprint: Fingerprint,
    pub iterations: u32,
}

/// What a resumed view should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSnapshot {
    pub fingerprint: Fingerprint,
    pub elapsed_ms: u64,
    pub estimated_percent: f64,
    pub stage: Stage,
}

impl SessionMarker {
    /// Expected wall time: one minute per ten iterations, at least one minute.
    pub fn expected_duration_ms(&self) -> u64 {
        let factor = (f64::from(self.iterations) / 10.0).max(1.0);
        (RESUME_EXPECTED_RUN_MS as f64 * factor) as u64
    }

    pub fn snapshot(&self, now_ms: i64) -> ResumeSnapshot {
        let elapsed_ms = now_ms.saturating_sub(self.started_at_ms).max(0) as u64;
        let expected = self.expected_duration_ms().max(1) as f64;
        let estimated_percent = (elapsed_ms as f64 / expected * 100.0).min(CRAWL_CEILING_PERCENT);
        ResumeSnapshot {
            fingerprint: self.fingerprint.clone(),
            elapsed_ms,
            estimated_percent,
            stage: Stage::for_percent(estimated_percent),
        }
    }
}

/// Marker persistence. Failures are logged and otherwise ignored.
pub struct SessionStore {
    store: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn mark_started(&self, marker: &SessionMarker) {
        let json = match serde_json::to_string(marker) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(target = "simlab", error = %err, "session marker serialize failed");
                return;
            }
        };
        if let Err(err) = self.store.set(SESSION_MARKER_KEY, &json) {
            tracing::warn!(target = "simlab", error = %err, "session marker write failed");
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove(SESSION_MARKER_KEY) {
            tracing::warn!(target = "simlab", error = %err, "session marker clear failed");
        }
    }

    pub fn load(&self) -> Option<SessionMarker> {
        let raw = self.store.get(SESSION_MARKER_KEY).ok().flatten()?;
        match serde_json::from_str(&raw) {
            Ok(marker) => Some(marker),
            Err(err) => {
                tracing::warn!(target = "simlab", error = %err, "unreadable session marker removed");
                self.clear();
                None
            }
        }
    }

    pub fn resume_snapshot(&self, now_ms: i64) -> Option<ResumeSnapshot> {
        self.load().map(|marker| marker.snapshot(now_ms))
    }
}
