//! Run limits and capacity configuration

/// Inclusive bounds for a validated numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

impl Bounds {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Configuration limits.
pub const HOSTS: Bounds = Bounds::new(1, 1_000);
pub const VMS: Bounds = Bounds::new(1, 10_000);
pub const PES_PER_HOST: Bounds = Bounds::new(1, 128);
pub const MIPS: Bounds = Bounds::new(1, 1_000_000);
pub const RAM_PER_HOST: Bounds = Bounds::new(1, 1_048_576); // 1 TiB in MiB
pub const CLOUDLETS: Bounds = Bounds::new(1, 100_000);
pub const ITERATIONS: Bounds = Bounds::new(1, 100);

/// Uploaded workload size cap.
pub const MAX_WORKLOAD_FILE_BYTES: u64 = 500 * 1024 * 1024; // 500 MiB

/// Iteration count at which paired statistical comparison is selected.
pub const COMPARISON_ITERATION_THRESHOLD: u32 = 30;

/// Cache limits.
pub const CACHE_MAX_ENTRIES: usize = 10;
pub const CACHE_TTL_HOURS: u64 = 24;

/// History limits.
pub const HISTORY_MAX_ENTRIES: usize = 200;
/// Retained windows tried, largest first, when a history write exceeds quota.
pub const HISTORY_DEGRADE_WINDOWS: [usize; 4] = [100, 50, 20, 10];

/// Shared store quota (bytes of key + value).
pub const DEFAULT_STORAGE_QUOTA_BYTES: usize = 5 * 1024 * 1024; // 5 MiB

/// Progress ceiling for the simulated crawl.
pub const CRAWL_CEILING_PERCENT: f64 = 95.0;
/// Progress milestone after the first algorithm of a sequential run.
pub const FIRST_ALGORITHM_DONE_PERCENT: f64 = 70.0;
