//! Run lifecycle state machine.
//!
//! ```text
//! Config --start_run--> Loading --success--> Animation --show_results--> Results
//!    ^                     |                                                |
//!    +--cancel / failure---+                                                |
//!    +-------------------------------new_run--------------------------------+
//! ```
//!
//! One run at a time. Every task a run spawns (progress crawl and poll,
//! in-flight requests, the deferred artifact poller) is torn down together
//! when the run ends by any path. Each run gets a generation number; a task
//! that finds its generation stale or its token cancelled must not touch
//! shared state.
//!
//! INVARIANT: history and cache are written only after both algorithms'
//! results exist.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::backend::SimulationBackend;
use crate::config::limits::{CACHE_MAX_ENTRIES, CACHE_TTL_HOURS, FIRST_ALGORITHM_DONE_PERCENT, HISTORY_MAX_ENTRIES};
use crate::config::resilience::{warm_up_policy, RetryPolicy};
use crate::config::settings::SimlabSettings;
use crate::config::timeouts::{
    ARTIFACT_POLL_INTERVAL_MS, ARTIFACT_POLL_MAX_ATTEMPTS, RESULTS_SETTLE_DELAY_MS,
};
use crate::errors::{SimError, SimResult};
use crate::events::{EventBus, RunEvent};
use crate::history::{HistoryDocument, HistoryEntry, HistoryPair, HistoryStore};
use crate::job::{merge_artifacts, run_cancellable, ArtifactTracker, CancelToken, JobHandle};
use crate::model::{Algorithm, ModeKind, RunConfiguration, RunPair, RunResult, SimulationMode};
use crate::progress::{ProgressState, ProgressTracker};
use crate::result_cache::{compute_fingerprint, ResultCache};
use crate::session::{ResumeSnapshot, SessionMarker, SessionStore};
use crate::storage::KvStore;
use crate::ttest;
use crate::validation::{validate_config, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Config,
    Loading,
    Animation,
    Results,
}

/// How a run is executed against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Single,
    Iterative,
    /// One request for both algorithms plus a paired t-test.
    Comparison,
    /// Metrics now, plots polled afterwards.
    AsyncPlots,
}

impl Strategy {
    pub fn select(config: &RunConfiguration) -> Self {
        let mode = SimulationMode::derive(config);
        match mode.kind {
            ModeKind::Comparison => Strategy::Comparison,
            ModeKind::Iterative => Strategy::Iterative,
            ModeKind::Single if config.enable_plots && !mode.with_workload_file => {
                Strategy::AsyncPlots
            }
            ModeKind::Single => Strategy::Single,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        from_cache: bool,
        history_id: Option<String>,
    },
    /// Validation failed; the run never started.
    Rejected(ValidationErrors),
    /// Another run is already loading.
    Busy,
    Cancelled,
    Failed(SimError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub history_max_entries: usize,
    pub artifact_poll_interval: Duration,
    pub artifact_poll_attempts: u32,
    /// Pause between publishing 100% and leaving the loading state.
    pub settle_delay: Duration,
    pub poll_progress: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: warm_up_policy(),
            cache_ttl: Duration::from_secs(CACHE_TTL_HOURS * 60 * 60),
            cache_max_entries: CACHE_MAX_ENTRIES,
            history_max_entries: HISTORY_MAX_ENTRIES,
            artifact_poll_interval: Duration::from_millis(ARTIFACT_POLL_INTERVAL_MS),
            artifact_poll_attempts: ARTIFACT_POLL_MAX_ATTEMPTS,
            settle_delay: Duration::from_millis(RESULTS_SETTLE_DELAY_MS),
            poll_progress: true,
        }
    }
}

impl From<&SimlabSettings> for OrchestratorOptions {
    fn from(settings: &SimlabSettings) -> Self {
        Self {
            cache_ttl: settings.cache_ttl,
            cache_max_entries: settings.cache_max_entries,
            history_max_entries: settings.history_max_entries,
            ..Self::default()
        }
    }
}

struct ActiveRun {
    job: JobHandle,
    progress: ProgressTracker,
    /// Results are committed; the run only waits to leave Loading.
    committed: bool,
}

struct ArtifactJob {
    token: CancelToken,
    task: JoinHandle<()>,
}

struct Inner {
    backend: Arc<dyn SimulationBackend>,
    cache: ResultCache,
    history: HistoryStore,
    sessions: SessionStore,
    events: EventBus,
    options: OrchestratorOptions,
    state_tx: watch::Sender<RunState>,
    progress_tx: Arc<watch::Sender<ProgressState>>,
    results_tx: watch::Sender<Option<RunPair>>,
    generation: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
    artifacts: Mutex<Option<ArtifactJob>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn SimulationBackend>, store: Arc<dyn KvStore>) -> Self {
        Self::with_options(backend, store, OrchestratorOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn SimulationBackend>,
        store: Arc<dyn KvStore>,
        options: OrchestratorOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(RunState::Config);
        let (progress_tx, _) = watch::channel(ProgressState::default());
        let (results_tx, _) = watch::channel(None);
        let inner = Inner {
            backend,
            cache: ResultCache::with_limits(store.clone(), options.cache_ttl, options.cache_max_entries),
            history: HistoryStore::with_max_entries(store.clone(), options.history_max_entries),
            sessions: SessionStore::new(store),
            events: EventBus::new(),
            options,
            state_tx,
            progress_tx: Arc::new(progress_tx),
            results_tx,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
            artifacts: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // ------------------------------------------------------------------
    // Observables
    // ------------------------------------------------------------------

    pub fn state(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> RunState {
        *self.inner.state_tx.borrow()
    }

    pub fn progress(&self) -> watch::Receiver<ProgressState> {
        self.inner.progress_tx.subscribe()
    }

    pub fn results(&self) -> watch::Receiver<Option<RunPair>> {
        self.inner.results_tx.subscribe()
    }

    pub fn current_results(&self) -> Option<RunPair> {
        self.inner.results_tx.borrow().clone()
    }

    /// Backend tracking id of the in-flight run, once an async request has
    /// returned one.
    pub fn active_remote_id(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .as_ref()
            .and_then(|run| run.job.remote_id().map(str::to_string))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn history(&self) -> &HistoryStore {
        &self.inner.history
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validate, then serve from cache or run against the backend.
    pub async fn start_run(&self, config: RunConfiguration) -> RunOutcome {
        let inner = &self.inner;
        if let Err(errors) = validate_config(&config) {
            tracing::info!(target = "simlab", problems = errors.len(), "configuration rejected");
            inner.events.emit_or_log(RunEvent::ValidationFailed {
                errors: errors.clone(),
            });
            return RunOutcome::Rejected(errors);
        }

        let mode = SimulationMode::derive(&config);
        let strategy = Strategy::select(&config);
        let fingerprint = compute_fingerprint(&config, mode);

        let (generation, token) = {
            let mut active = inner.active.lock();
            if active.is_some() {
                tracing::warn!(target = "simlab", "run requested while another is loading");
                return RunOutcome::Busy;
            }
            inner.abort_artifacts();
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let job = JobHandle::new(generation);
            let token = job.token().clone();
            ProgressTracker::reset(&inner.progress_tx);
            let poller = inner.options.poll_progress.then(|| inner.backend.clone());
            let progress = ProgressTracker::start(inner.progress_tx.clone(), poller, config.iterations);
            *active = Some(ActiveRun {
                job,
                progress,
                committed: false,
            });
            inner.results_tx.send_replace(None);
            inner.set_state(RunState::Loading);
            (generation, token)
        };

        inner.sessions.mark_started(&SessionMarker {
            started_at_ms: Utc::now().timestamp_millis(),
            fingerprint: fingerprint.clone(),
            iterations: config.iterations,
        });
        tracing::info!(
            target = "simlab",
            generation,
            mode = mode.tag(),
            strategy = ?strategy,
            key = %fingerprint,
            "run started"
        );
        inner.events.emit_or_log(RunEvent::Started {
            mode: mode.tag().to_string(),
        });

        if let Some(cached) = inner.cache.get(&config, mode) {
            if !inner.commit(generation) {
                return RunOutcome::Cancelled;
            }
            inner.events.emit_or_log(RunEvent::CacheHit {
                key: cached.key.to_string(),
                cached_at_ms: cached.cached_at_ms,
            });
            let history_id = inner.record_history(&cached.results, &config);
            return self
                .finish_success(generation, cached.results, mode, strategy, history_id, true)
                .await;
        }

        let executed = inner.execute(strategy, &config, &token, generation).await;
        match executed {
            Ok(pair) => {
                if !inner.commit(generation) {
                    tracing::info!(target = "simlab", generation, "results discarded after cancellation");
                    return RunOutcome::Cancelled;
                }
                let history_id = inner.record_history(&pair, &config);
                inner.cache.put(&config, mode, &pair);
                self.finish_success(generation, pair, mode, strategy, history_id, false)
                    .await
            }
            Err(err) if err.is_cancelled() || token.is_cancelled() => RunOutcome::Cancelled,
            Err(err) => {
                if inner.fail(generation, &err) {
                    RunOutcome::Failed(err)
                } else {
                    RunOutcome::Cancelled
                }
            }
        }
    }

    /// Publish committed results. The run stays claimed through the settle
    /// delay so a cancel or a new start cannot slip in while still Loading.
    async fn finish_success(
        &self,
        generation: u64,
        pair: RunPair,
        mode: SimulationMode,
        strategy: Strategy,
        history_id: Option<String>,
        from_cache: bool,
    ) -> RunOutcome {
        let inner = &self.inner;
        inner.sessions.clear();

        let plots_pending = strategy == Strategy::AsyncPlots && pair.plots_pending() && !from_cache;
        if plots_pending {
            self.spawn_artifact_job(generation, &pair);
        }
        inner.results_tx.send_replace(Some(pair));

        tokio::time::sleep(inner.options.settle_delay).await;
        let elapsed_ms = inner
            .release(generation)
            .map(|run| run.job.elapsed_ms())
            .unwrap_or_default();
        tracing::info!(
            target = "simlab",
            generation,
            elapsed_ms,
            from_cache,
            plots_pending,
            "run completed"
        );
        inner.events.emit_or_log(RunEvent::Completed {
            mode: mode.tag().to_string(),
            history_id: history_id.clone(),
        });
        RunOutcome::Completed {
            from_cache,
            history_id,
        }
    }

    fn spawn_artifact_job(&self, generation: u64, pair: &RunPair) {
        let tracked: Vec<(Algorithm, String)> = Algorithm::BOTH
            .iter()
            .filter_map(|alg| pair.get(*alg).tracking_id.clone().map(|id| (*alg, id)))
            .collect();
        if tracked.is_empty() {
            return;
        }
        let token = CancelToken::new();
        let task_token = token.clone();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let tracker = ArtifactTracker::with_budget(
                inner.options.artifact_poll_interval,
                inner.options.artifact_poll_attempts,
            );
            let outcomes = tracker
                .poll_until_settled(inner.backend.as_ref(), &tracked, &task_token)
                .await;
            if task_token.is_cancelled() {
                return;
            }
            let ready = outcomes.iter().filter(|(_, o)| o.is_ready()).count();
            let merged = inner.results_tx.send_if_modified(|results| {
                if !inner.is_current(generation) {
                    return false;
                }
                match results.as_mut() {
                    Some(pair) => merge_artifacts(pair, &outcomes),
                    None => false,
                }
            });
            if merged {
                inner.events.emit_or_log(RunEvent::ArtifactsReady {
                    ready,
                    pending: outcomes.len() - ready,
                });
            }
        });
        *self.inner.artifacts.lock() = Some(ArtifactJob { token, task });
    }

    /// Abort the current run. Returns false when nothing was running.
    pub async fn cancel_run(&self) -> bool {
        let inner = &self.inner;
        let generation = {
            // Held through the teardown so neither a commit nor a new start
            // interleaves with it.
            let mut active = inner.active.lock();
            let run = match active.as_ref() {
                Some(run) if run.committed => {
                    tracing::debug!(target = "simlab", job = %run.job.id, "cancel ignored, run already completed");
                    return false;
                }
                Some(_) => active.take(),
                None if self.current_state() != RunState::Loading => return false,
                None => None,
            };
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            inner.abort_artifacts();
            if let Some(mut run) = run {
                run.job.cancel();
                run.progress.stop();
                tracing::info!(
                    target = "simlab",
                    job = %run.job.id,
                    remote_id = run.job.remote_id().unwrap_or("-"),
                    elapsed_ms = run.job.elapsed_ms(),
                    "run cancelled"
                );
            }
            inner.sessions.clear();
            inner.results_tx.send_replace(None);
            ProgressTracker::reset(&inner.progress_tx);
            inner.set_state(RunState::Config);
            inner.events.emit_or_log(RunEvent::Cancelled);
            generation
        };

        if let Err(err) = inner.backend.cancel_run().await {
            tracing::warn!(target = "simlab", generation, error = %err, "remote cancel failed");
        }
        true
    }

    /// Animation -> Results.
    pub fn show_results(&self) -> bool {
        if self.current_state() != RunState::Animation {
            return false;
        }
        self.inner.set_state(RunState::Results);
        true
    }

    /// Back to the configuration form. Not allowed while loading.
    pub fn new_run(&self) -> bool {
        let inner = &self.inner;
        if self.current_state() == RunState::Loading {
            return false;
        }
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.abort_artifacts();
        inner.results_tx.send_replace(None);
        ProgressTracker::reset(&inner.progress_tx);
        inner.set_state(RunState::Config);
        true
    }

    // ------------------------------------------------------------------
    // Session resumption
    // ------------------------------------------------------------------

    pub fn resume_snapshot(&self, now_ms: i64) -> Option<ResumeSnapshot> {
        self.inner.sessions.resume_snapshot(now_ms)
    }

    /// Re-show the loading view for a run recorded in the resume marker.
    pub fn resume(&self, now_ms: i64) -> Option<ResumeSnapshot> {
        let inner = &self.inner;
        let snapshot = inner.sessions.resume_snapshot(now_ms)?;
        let running = inner.active.lock().is_some();
        inner
            .progress_tx
            .send_if_modified(|state| state.raise_to(snapshot.estimated_percent));
        if !running && self.current_state() != RunState::Loading {
            inner.set_state(RunState::Loading);
        }
        tracing::info!(
            target = "simlab",
            key = %snapshot.fingerprint,
            elapsed_ms = snapshot.elapsed_ms,
            estimated_percent = snapshot.estimated_percent,
            "resumed in-flight run"
        );
        Some(snapshot)
    }

    pub fn on_visibility_change(&self, visible: bool) -> Option<ResumeSnapshot> {
        if !visible {
            return None;
        }
        self.resume(Utc::now().timestamp_millis())
    }

    // ------------------------------------------------------------------
    // History facade
    // ------------------------------------------------------------------

    pub fn history_list(&self) -> Vec<HistoryEntry> {
        self.inner.history.list()
    }

    pub fn history_pair(&self, id: &str) -> Option<HistoryPair> {
        self.inner.history.find_pair(id)
    }

    pub fn delete_pair(&self, id: &str) -> SimResult<bool> {
        self.inner.history.remove(id)
    }

    pub fn clear_all(&self) -> SimResult<()> {
        self.inner.history.clear()
    }

    pub fn clear_cache(&self) -> usize {
        self.inner.cache.clear_all()
    }

    pub fn export_history(&self) -> HistoryDocument {
        self.inner.history.export()
    }

    pub fn import_history(&self, document: HistoryDocument) -> SimResult<usize> {
        self.inner.history.import(document)
    }

    pub fn import_history_json(&self, raw: &str) -> SimResult<usize> {
        self.inner.history.import_json(raw)
    }
}

impl Inner {
    fn set_state(&self, next: RunState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::info!(target = "simlab", from = ?previous, to = ?next, "state transition");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Claim the run's end. Only one path (completion, failure, cancel) wins.
    fn take_active(&self, generation: u64) -> Option<ActiveRun> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(run)
                if run.job.generation == generation
                    && !run.committed
                    && self.is_current(generation) =>
            {
                active.take()
            }
            _ => None,
        }
    }

    /// Success wins the run's end: stop the timers and publish 100%. The run
    /// stays in `active` until [`Inner::release`].
    fn commit(&self, generation: u64) -> bool {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(run)
                if run.job.generation == generation
                    && !run.committed
                    && self.is_current(generation) =>
            {
                run.committed = true;
                run.progress.complete();
                true
            }
            _ => false,
        }
    }

    /// Drop a committed run and leave Loading, under the same lock that
    /// `cancel_run` and `start_run` check.
    fn release(&self, generation: u64) -> Option<ActiveRun> {
        let mut active = self.active.lock();
        let run = match active.as_ref() {
            Some(run) if run.job.generation == generation => active.take(),
            _ => None,
        };
        if run.is_some() && self.is_current(generation) {
            self.set_state(RunState::Animation);
        }
        run
    }

    fn record_remote_id(&self, generation: u64, remote_id: &str) {
        if let Some(run) = self.active.lock().as_mut() {
            if run.job.generation == generation {
                run.job.set_remote_id(remote_id);
            }
        }
    }

    fn mark_step(&self, generation: u64, percent: f64) {
        if let Some(run) = self.active.lock().as_ref() {
            if run.job.generation == generation {
                run.progress.mark_step(percent);
            }
        }
    }

    fn abort_artifacts(&self) {
        if let Some(job) = self.artifacts.lock().take() {
            job.token.cancel();
            job.task.abort();
            tracing::debug!(target = "simlab", "artifact polling stopped");
        }
    }

    /// Tear down after an unrecoverable error. False if the run was already
    /// ended by cancellation.
    fn fail(&self, generation: u64, err: &SimError) -> bool {
        let Some(mut run) = self.take_active(generation) else {
            return false;
        };
        run.progress.stop();
        self.sessions.clear();
        ProgressTracker::reset(&self.progress_tx);
        self.set_state(RunState::Config);
        tracing::error!(target = "simlab", generation, code = err.code(), error = %err, "run failed");
        self.events.emit_or_log(RunEvent::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        });
        true
    }

    fn record_history(&self, pair: &RunPair, config: &RunConfiguration) -> Option<String> {
        match self.history.append(&pair.eaco, &pair.epso, config) {
            Ok(outcome) => {
                if outcome.degraded {
                    self.events.emit_or_log(RunEvent::HistoryDegraded {
                        retained: outcome.retained,
                    });
                }
                Some(outcome.base_id)
            }
            Err(err) => {
                tracing::warn!(target = "simlab", error = %err, "history write skipped");
                None
            }
        }
    }

    async fn execute(
        &self,
        strategy: Strategy,
        config: &RunConfiguration,
        token: &CancelToken,
        generation: u64,
    ) -> SimResult<RunPair> {
        let backend = &self.backend;
        match strategy {
            Strategy::Comparison => {
                let response = self
                    .with_warm_up(None, token, move || backend.run_comparison(config))
                    .await?;
                let stats = ttest::normalize(response.statistical_test.as_ref());
                if stats.is_none() {
                    tracing::warn!(target = "simlab", "comparison response carried no statistical test");
                }
                let mut pair = RunPair::new(response.eaco, response.epso);
                pair.eaco.t_test_results = stats.clone();
                pair.epso.t_test_results = stats;
                Ok(pair)
            }
            Strategy::Single | Strategy::Iterative | Strategy::AsyncPlots => {
                let eaco = self.run_algorithm(strategy, config, Algorithm::Eaco, token, generation).await?;
                self.mark_step(generation, FIRST_ALGORITHM_DONE_PERCENT);
                let epso = self.run_algorithm(strategy, config, Algorithm::Epso, token, generation).await?;
                Ok(RunPair::new(eaco, epso))
            }
        }
    }

    async fn run_algorithm(
        &self,
        strategy: Strategy,
        config: &RunConfiguration,
        algorithm: Algorithm,
        token: &CancelToken,
        generation: u64,
    ) -> SimResult<RunResult> {
        let backend = &self.backend;
        let label = Some(algorithm);
        match strategy {
            Strategy::Iterative => {
                self.with_warm_up(label, token, move || backend.run_iterative(config, algorithm))
                    .await
            }
            Strategy::AsyncPlots => {
                match self
                    .with_warm_up(label, token, move || backend.run_async(config, algorithm))
                    .await
                {
                    Ok(started) => {
                        self.record_remote_id(generation, &started.tracking_id);
                        Ok(started.result)
                    }
                    Err(SimError::Http { status, .. }) if matches!(status, 404 | 405 | 501) => {
                        tracing::info!(target = "simlab", %algorithm, status, "async plots unavailable, rendering synchronously");
                        self.with_warm_up(label, token, move || backend.run_with_plots(config, algorithm))
                            .await
                    }
                    Err(err) => Err(err),
                }
            }
            Strategy::Single | Strategy::Comparison => {
                self.with_warm_up(label, token, move || backend.run_single(config, algorithm))
                    .await
            }
        }
    }

    /// Run `call`, retrying on the backend's warm-up state after a fixed delay.
    async fn with_warm_up<T, F, Fut>(
        &self,
        algorithm: Option<Algorithm>,
        token: &CancelToken,
        mut call: F,
    ) -> SimResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SimResult<T>>,
    {
        let mut attempt: u8 = 0;
        loop {
            match run_cancellable(token, call()).await {
                Err(SimError::WarmingUp) => {
                    let Some(delay) = self.options.retry.next_delay(attempt) else {
                        tracing::warn!(target = "simlab", algorithm = ?algorithm, attempts = attempt, "backend still warming up, giving up");
                        return Err(SimError::WarmingUp);
                    };
                    attempt += 1;
                    tracing::info!(
                        target = "simlab",
                        algorithm = ?algorithm,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "backend warming up, retrying"
                    );
                    self.events
                        .emit_or_log(RunEvent::WarmingUp { algorithm, attempt });
                    run_cancellable(token, async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                }
                other => return other,
            }
        }
    }
}
