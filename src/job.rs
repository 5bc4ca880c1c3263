//! Cancellable run handles and the deferred-artifact poller.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{ArtifactStatus, RunArtifacts, SimulationBackend};
use crate::config::timeouts::{ARTIFACT_POLL_INTERVAL_MS, ARTIFACT_POLL_MAX_ATTEMPTS};
use crate::errors::{SimError, SimResult};
use crate::model::{Algorithm, RunPair};

/// Cooperative cancellation flag shared by every task of one run.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_if_modified(|cancelled| !std::mem::replace(cancelled, true));
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the token.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Race `fut` against `token`. Cancellation wins ties.
pub async fn run_cancellable<T, F>(token: &CancelToken, fut: F) -> SimResult<T>
where
    F: Future<Output = SimResult<T>>,
{
    if token.is_cancelled() {
        return Err(SimError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SimError::Cancelled),
        result = fut => result,
    }
}

/// One in-flight run.
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    /// Orchestrator generation this job belongs to.
    pub generation: u64,
    token: CancelToken,
    remote_id: Option<String>,
    started: Instant,
}

impl JobHandle {
    pub fn new(generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            token: CancelToken::new(),
            remote_id: None,
            started: Instant::now(),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn set_remote_id(&mut self, id: impl Into<String>) {
        self.remote_id = Some(id.into());
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

// ----------------------------------------------------------------------------
// Deferred artifacts
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactOutcome {
    Ready(RunArtifacts),
    Failed(String),
    /// Still pending when the attempt budget ran out.
    TimedOut,
    /// Still pending when another id failed.
    Abandoned,
    Cancelled,
}

impl ArtifactOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ArtifactOutcome::Ready(_))
    }
}

pub struct ArtifactTracker {
    interval: Duration,
    max_attempts: u32,
}

impl Default for ArtifactTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self::with_budget(
            Duration::from_millis(ARTIFACT_POLL_INTERVAL_MS),
            ARTIFACT_POLL_MAX_ATTEMPTS,
        )
    }

    pub fn with_budget(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Poll every tracked id until all complete, any fails, the budget is
    /// spent or `token` fires. Returns one outcome per tracked id.
    pub async fn poll_until_settled(
        &self,
        backend: &dyn SimulationBackend,
        tracked: &[(Algorithm, String)],
        token: &CancelToken,
    ) -> Vec<(Algorithm, ArtifactOutcome)> {
        let mut outcomes: Vec<(Algorithm, Option<ArtifactOutcome>)> =
            tracked.iter().map(|(alg, _)| (*alg, None)).collect();

        for attempt in 1..=self.max_attempts {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(target = "simlab", attempt, "artifact polling cancelled");
                    return settle(outcomes, ArtifactOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let pending: Vec<usize> = (0..tracked.len())
                .filter(|&i| outcomes[i].1.is_none())
                .collect();
            let polls = pending
                .iter()
                .map(|&i| backend.poll_artifact_status(&tracked[i].1));
            let statuses = join_all(polls).await;

            let mut failed = false;
            for (i, status) in pending.into_iter().zip(statuses) {
                let (algorithm, tracking_id) = &tracked[i];
                match status {
                    Ok(ArtifactStatus::Pending) => {}
                    Ok(ArtifactStatus::Complete(artifacts)) => {
                        tracing::info!(target = "simlab", %algorithm, tracking_id = %tracking_id, attempt, "artifacts ready");
                        outcomes[i].1 = Some(ArtifactOutcome::Ready(artifacts));
                    }
                    Ok(ArtifactStatus::Failed(message)) => {
                        tracing::warn!(target = "simlab", %algorithm, tracking_id = %tracking_id, error = %message, "artifact generation failed");
                        outcomes[i].1 = Some(ArtifactOutcome::Failed(message));
                        failed = true;
                    }
                    Err(err) => {
                        tracing::debug!(target = "simlab", %algorithm, tracking_id = %tracking_id, error = %err, "artifact poll failed");
                    }
                }
            }

            if token.is_cancelled() {
                return settle(outcomes, ArtifactOutcome::Cancelled);
            }
            if failed {
                return settle(outcomes, ArtifactOutcome::Abandoned);
            }
            if outcomes.iter().all(|(_, o)| o.is_some()) {
                return settle(outcomes, ArtifactOutcome::TimedOut);
            }
        }

        tracing::warn!(target = "simlab", attempts = self.max_attempts, "artifact polling budget exhausted");
        settle(outcomes, ArtifactOutcome::TimedOut)
    }
}

fn settle(
    outcomes: Vec<(Algorithm, Option<ArtifactOutcome>)>,
    pending: ArtifactOutcome,
) -> Vec<(Algorithm, ArtifactOutcome)> {
    outcomes
        .into_iter()
        .map(|(alg, outcome)| (alg, outcome.unwrap_or_else(|| pending.clone())))
        .collect()
}

/// Fold settled artifacts into `pair`. Returns whether anything changed.
pub fn merge_artifacts(pair: &mut RunPair, outcomes: &[(Algorithm, ArtifactOutcome)]) -> bool {
    let mut changed = false;
    for (algorithm, outcome) in outcomes {
        let result = pair.get_mut(*algorithm);
        if let ArtifactOutcome::Ready(artifacts) = outcome {
            result.plot_data = Some(artifacts.plot_data.clone());
            if artifacts.simulation_id.is_some() {
                result.simulation_id = artifacts.simulation_id.clone();
            }
            changed = true;
        }
        if result.plots_generating {
            result.plots_generating = false;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlotData, RunResult};
    use crate::test_support::ScriptedBackend;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn tracked() -> Vec<(Algorithm, String)> {
        vec![
            (Algorithm::Eaco, "track-eaco".to_string()),
            (Algorithm::Epso, "track-epso".to_string()),
        ]
    }

    fn ready(path: &str) -> ArtifactStatus {
        ArtifactStatus::Complete(RunArtifacts {
            simulation_id: Some(format!("sim-{path}")),
            plot_data: PlotData {
                plot_paths: vec![path.to_string()],
                ..PlotData::default()
            },
        })
    }

    #[tokio::test]
    async fn cancellable_future_loses_to_token() {
        let token = CancelToken::new();
        let cloned = token.clone();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, SimError>(1)
        };
        let (result, _) = tokio::join!(run_cancellable(&token, slow), async move {
            tokio::task::yield_now().await;
            cloned.cancel();
        });
        assert!(result.unwrap_err().is_cancelled());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let handle = JobHandle::new(7);
        handle.cancel();
        let result = run_cancellable(handle.token(), async { Ok::<_, SimError>(1) }).await;
        assert!(matches!(result, Err(SimError::Cancelled)));
        assert_eq!(handle.generation, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_once_all_complete() {
        let backend = ScriptedBackend::new();
        backend.push_artifact("track-eaco", ArtifactStatus::Pending);
        backend.push_artifact("track-eaco", ready("a.png"));
        backend.push_artifact("track-epso", ready("b.png"));

        let outcomes = ArtifactTracker::new()
            .poll_until_settled(&backend, &tracked(), &CancelToken::new())
            .await;
        assert!(outcomes.iter().all(|(_, o)| o.is_ready()));
        // Two rounds for EACO, one for EPSO.
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stops_polling_early() {
        let backend = ScriptedBackend::new();
        backend.push_artifact("track-eaco", ArtifactStatus::Failed("render crashed".into()));

        let outcomes = ArtifactTracker::new()
            .poll_until_settled(&backend, &tracked(), &CancelToken::new())
            .await;
        assert_eq!(outcomes[0].1, ArtifactOutcome::Failed("render crashed".into()));
        assert_eq!(outcomes[1].1, ArtifactOutcome::Abandoned);
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_bounds_attempts() {
        let backend = ScriptedBackend::new();
        let outcomes = ArtifactTracker::with_budget(Duration::from_millis(10), 4)
            .poll_until_settled(&backend, &tracked(), &CancelToken::new())
            .await;
        assert!(outcomes.iter().all(|(_, o)| *o == ArtifactOutcome::TimedOut));
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn token_stops_polling() {
        let backend = ScriptedBackend::new();
        let token = CancelToken::new();
        token.cancel();
        let outcomes = ArtifactTracker::new()
            .poll_until_settled(&backend, &tracked(), &token)
            .await;
        assert!(outcomes.iter().all(|(_, o)| *o == ArtifactOutcome::Cancelled));
        assert_eq!(backend.artifact_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn merge_updates_plot_metadata_only() {
        let mut eaco = RunResult::new(Algorithm::Eaco, json!({ "summary": { "makespan": 9.0 } }));
        eaco.plots_generating = true;
        let mut epso = RunResult::new(Algorithm::Epso, json!({ "summary": { "makespan": 8.0 } }));
        epso.plots_generating = true;
        let mut pair = RunPair::new(eaco, epso);

        let outcomes = vec![
            (
                Algorithm::Eaco,
                ArtifactOutcome::Ready(RunArtifacts {
                    simulation_id: Some("sim-1".into()),
                    plot_data: PlotData {
                        plot_paths: vec!["gantt.png".into()],
                        ..PlotData::default()
                    },
                }),
            ),
            (Algorithm::Epso, ArtifactOutcome::TimedOut),
        ];
        assert!(merge_artifacts(&mut pair, &outcomes));
        assert_eq!(pair.eaco.summary.makespan, Some(9.0));
        assert_eq!(pair.eaco.simulation_id.as_deref(), Some("sim-1"));
        assert!(pair.eaco.plot_data.as_ref().is_some_and(PlotData::has_plots));
        assert!(pair.epso.plot_data.is_none());
        assert!(!pair.plots_pending());
    }
}
