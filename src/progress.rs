//! Loading-screen progress.
//!
//! Two timers feed one `watch` channel while a run is in flight: a simulated
//! crawl that slows as it climbs, and an authoritative poll of the backend
//! that overrides the crawl whenever the backend reports real numbers. The
//! published percent never decreases during a run and only reaches 100 on
//! completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::backend::{ProgressReport, SimulationBackend};
use crate::config::limits::CRAWL_CEILING_PERCENT;
use crate::config::timeouts::{PROGRESS_CRAWL_TICK_MS, PROGRESS_POLL_INTERVAL_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initializing,
    Scheduling,
    Simulating,
    Analyzing,
    Finalizing,
}

impl Stage {
    pub fn for_percent(percent: f64) -> Self {
        if percent < 10.0 {
            Stage::Initializing
        } else if percent < 30.0 {
            Stage::Scheduling
        } else if percent < 60.0 {
            Stage::Simulating
        } else if percent < 90.0 {
            Stage::Analyzing
        } else {
            Stage::Finalizing
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Scheduling => "scheduling",
            Stage::Simulating => "simulating",
            Stage::Analyzing => "analyzing",
            Stage::Finalizing => "finalizing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub percent: f64,
    pub stage: Stage,
    /// Backend-reported stage text, when it sends one.
    pub detail: Option<String>,
    pub current_iteration: Option<u32>,
    pub total_iterations: Option<u32>,
    /// True once any value came from the backend rather than the crawl.
    pub authoritative: bool,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::at(0.0)
    }
}

impl ProgressState {
    pub fn at(percent: f64) -> Self {
        Self {
            percent,
            stage: Stage::for_percent(percent),
            detail: None,
            current_iteration: None,
            total_iterations: None,
            authoritative: false,
        }
    }

    /// Raise the percent; lower values are ignored.
    pub(crate) fn raise_to(&mut self, percent: f64) -> bool {
        if percent > self.percent {
            self.percent = percent;
            self.stage = Stage::for_percent(percent);
            true
        } else {
            false
        }
    }

    fn apply_report(&mut self, report: &ProgressReport) -> bool {
        let mut changed = false;
        if let Some(target) = report.percent.or_else(|| report.iteration_percent()) {
            // 100 is reserved for completion.
            changed |= self.raise_to(target.clamp(0.0, 99.0));
        }
        if report.current_iteration.is_some() && report.current_iteration != self.current_iteration {
            self.current_iteration = report.current_iteration;
            changed = true;
        }
        if report.total_iterations.is_some() && report.total_iterations != self.total_iterations {
            self.total_iterations = report.total_iterations;
            changed = true;
        }
        if report.stage.is_some() && report.stage != self.detail {
            self.detail = report.stage.clone();
            changed = true;
        }
        if changed {
            self.authoritative = true;
        }
        changed
    }
}

/// Crawl increment for one tick at `percent`.
pub fn crawl_step(percent: f64, multi_iteration: bool) -> f64 {
    let step = if percent < 10.0 {
        2.0
    } else if percent < 30.0 {
        1.5
    } else if percent < 60.0 {
        0.8
    } else if percent < 90.0 {
        0.5
    } else if percent < CRAWL_CEILING_PERCENT {
        0.3
    } else {
        0.0
    };
    if multi_iteration {
        step * 0.6
    } else {
        step
    }
}

/// Owns the crawl and poll tasks of one run.
///
/// Tasks are aborted by [`ProgressTracker::stop`] and on drop. Writes are
/// additionally gated on an `active` flag checked under the channel lock, so
/// nothing lands after `stop` returns.
pub struct ProgressTracker {
    tx: Arc<watch::Sender<ProgressState>>,
    active: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProgressTracker {
    /// Start the crawl, and the poll loop when a backend is given.
    pub fn start(
        tx: Arc<watch::Sender<ProgressState>>,
        backend: Option<Arc<dyn SimulationBackend>>,
        iterations: u32,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(crawl_loop(tx.clone(), active.clone(), iterations > 1)));
        if let Some(backend) = backend {
            tasks.push(tokio::spawn(poll_loop(tx.clone(), active.clone(), backend)));
        }
        tracing::debug!(target = "simlab", iterations, "progress tracker started");
        Self { tx, active, tasks }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Explicit milestone; never lowers the percent.
    pub fn mark_step(&self, percent: f64) {
        let active = &self.active;
        self.tx.send_if_modified(|state| {
            active.load(Ordering::SeqCst) && state.raise_to(percent.min(99.0))
        });
    }

    /// Stop both timers. Idempotent.
    pub fn stop(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(target = "simlab", "progress tracker stopped");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Stop the timers and publish 100%.
    pub fn complete(&mut self) {
        self.stop();
        self.tx.send_modify(|state| {
            state.percent = 100.0;
            state.stage = Stage::Finalizing;
        });
    }

    /// Publish 0% with no iteration info.
    pub fn reset(tx: &watch::Sender<ProgressState>) {
        tx.send_replace(ProgressState::default());
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn crawl_loop(
    tx: Arc<watch::Sender<ProgressState>>,
    active: Arc<AtomicBool>,
    multi_iteration: bool,
) {
    let period = Duration::from_millis(PROGRESS_CRAWL_TICK_MS);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tx.send_if_modified(|state| {
            if !active.load(Ordering::SeqCst) {
                return false;
            }
            let step = crawl_step(state.percent, multi_iteration);
            step > 0.0 && state.raise_to((state.percent + step).min(CRAWL_CEILING_PERCENT))
        });
    }
}

async fn poll_loop(
    tx: Arc<watch::Sender<ProgressState>>,
    active: Arc<AtomicBool>,
    backend: Arc<dyn SimulationBackend>,
) {
    let period = Duration::from_millis(PROGRESS_POLL_INTERVAL_MS);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match backend.poll_progress().await {
            Ok(Some(report)) => {
                tx.send_if_modified(|state| {
                    active.load(Ordering::SeqCst) && state.apply_report(&report)
                });
            }
            Ok(None) => {
                tracing::debug!(target = "simlab", "backend does not report progress; crawl only");
                return;
            }
            Err(err) => {
                tracing::debug!(target = "simlab", error = %err, "progress poll failed");
            }
        }
    }
}
