//! Test support infrastructure.
//!
//! Only compiled for unit tests. No runtime code references anything here.

#![cfg(test)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::backend::{ArtifactStatus, AsyncRun, ComparisonResponse, ProgressReport, SimulationBackend};
use crate::errors::{SimError, SimResult};
use crate::model::{Algorithm, RunConfiguration, RunResult};

/// One scripted reply to a run request.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    WarmingUp,
    Fail(String),
}

/// In-memory backend driven by per-call scripts.
#[derive(Default)]
pub struct ScriptedBackend {
    runs: Mutex<HashMap<Algorithm, VecDeque<Reply>>>,
    progress: Mutex<VecDeque<Option<ProgressReport>>>,
    artifacts: Mutex<HashMap<String, VecDeque<ArtifactStatus>>>,
    delay: Mutex<Duration>,
    pub run_calls: AtomicUsize,
    pub progress_calls: AtomicUsize,
    pub artifact_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn push_run(&self, algorithm: Algorithm, reply: Reply) {
        self.runs.lock().entry(algorithm).or_default().push_back(reply);
    }

    pub fn push_progress(&self, report: Option<ProgressReport>) {
        self.progress.lock().push_back(report);
    }

    pub fn push_artifact(&self, tracking_id: &str, status: ArtifactStatus) {
        self.artifacts
            .lock()
            .entry(tracking_id.to_string())
            .or_default()
            .push_back(status);
    }

    async fn next(&self, algorithm: Algorithm) -> SimResult<RunResult> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .runs
            .lock()
            .get_mut(&algorithm)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Reply::Ok(json!({ "summary": { "makespan": 1.0 } })));
        match reply {
            Reply::Ok(body) => Ok(RunResult::from_response(algorithm, body)),
            Reply::WarmingUp => Err(SimError::WarmingUp),
            Reply::Fail(msg) => Err(SimError::Run(msg)),
        }
    }
}

#[async_trait]
impl SimulationBackend for ScriptedBackend {
    async fn run_single(&self, _config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult> {
        self.next(algorithm).await
    }

    async fn run_iterative(&self, _config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult> {
        self.next(algorithm).await
    }

    async fn run_comparison(&self, _config: &RunConfiguration) -> SimResult<ComparisonResponse> {
        let eaco = self.next(Algorithm::Eaco).await?;
        let epso = self.next(Algorithm::Epso).await?;
        Ok(ComparisonResponse {
            eaco,
            epso,
            statistical_test: None,
        })
    }

    async fn run_with_plots(&self, _config: &RunConfiguration, algorithm: Algorithm) -> SimResult<RunResult> {
        self.next(algorithm).await
    }

    async fn run_async(&self, _config: &RunConfiguration, algorithm: Algorithm) -> SimResult<AsyncRun> {
        let mut result = self.next(algorithm).await?;
        let tracking_id = format!("track-{}", algorithm.slug());
        result.tracking_id = Some(tracking_id.clone());
        result.plots_generating = true;
        Ok(AsyncRun { tracking_id, result })
    }

    async fn poll_artifact_status(&self, tracking_id: &str) -> SimResult<ArtifactStatus> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        let mut artifacts = self.artifacts.lock();
        let queue = artifacts.entry(tracking_id.to_string()).or_default();
        // The last scripted status repeats.
        let status = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(status.unwrap_or(ArtifactStatus::Pending))
    }

    async fn cancel_run(&self) -> SimResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_progress(&self) -> SimResult<Option<ProgressReport>> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.progress.lock().pop_front().flatten())
    }
}
