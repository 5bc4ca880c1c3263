//! Retry configuration for transient backend states

use std::time::Duration;

use super::timeouts::WARM_UP_RETRY_DELAY_MS;

/// Retry policy for a transient backend condition
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u8,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (1.0 keeps the delay fixed)
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        warm_up_policy()
    }
}

/// Warm-up retry configuration
pub const WARM_UP_MAX_RETRIES: u8 = 3;

/// Backend warm-up: fixed delay, small ceiling.
pub fn warm_up_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: WARM_UP_MAX_RETRIES,
        base_delay_ms: WARM_UP_RETRY_DELAY_MS,
        max_delay_ms: WARM_UP_RETRY_DELAY_MS,
        multiplier: 1.0,
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn calculate_delay(&self, attempt: u8) -> Duration {
        let factor = self.multiplier.powi(i32::from(attempt));
        let raw = (self.base_delay_ms as f64 * factor).round();
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Returns the delay for the next retry, or None once the ceiling is hit.
    pub fn next_delay(&self, attempt: u8) -> Option<Duration> {
        if attempt < self.max_retries {
            Some(self.calculate_delay(attempt))
        } else {
            None
        }
    }
}
