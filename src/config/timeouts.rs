//! Timer cadences and waits

/// Simulated progress crawl tick.
pub const PROGRESS_CRAWL_TICK_MS: u64 = 500;
/// Authoritative progress poll interval.
pub const PROGRESS_POLL_INTERVAL_MS: u64 = 1_000;

/// Async artifact status poll interval.
pub const ARTIFACT_POLL_INTERVAL_MS: u64 = 2_000;
/// Maximum status polls per tracked artifact batch.
pub const ARTIFACT_POLL_MAX_ATTEMPTS: u32 = 60;

/// Delay between requests while the backend reports it is warming up.
pub const WARM_UP_RETRY_DELAY_MS: u64 = 5_000;

/// Pause between a finished run and the switch to the animation view.
pub const RESULTS_SETTLE_DELAY_MS: u64 = 500;

/// HTTP request timeout for long simulation calls.
pub const HTTP_RUN_TIMEOUT_MS: u64 = 30 * 60 * 1_000;
/// HTTP request timeout for status, progress and cancel calls.
pub const HTTP_CONTROL_TIMEOUT_MS: u64 = 10_000;

/// Baseline wall-clock duration assumed for a resumed run.
pub const RESUME_EXPECTED_RUN_MS: u64 = 60_000;
