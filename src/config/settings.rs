//! Runtime settings read from the process environment.
//!
//! Values are read once at startup; anything unset or unparsable falls back
//! to the compile-time defaults in [`super::limits`] and [`super::paths`].

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;

use super::limits::{
    CACHE_MAX_ENTRIES, CACHE_TTL_HOURS, DEFAULT_STORAGE_QUOTA_BYTES, HISTORY_MAX_ENTRIES,
};
use super::paths::{APP_DIR, STORE_DB};

pub const DEFAULT_API_BASE: &str = "http://localhost:8081";

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(dir) = std::env::var("SIMLAB_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_DIR)
});

#[derive(Debug, Clone, PartialEq)]
pub struct SimlabSettings {
    pub api_base: String,
    pub data_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub history_max_entries: usize,
    pub storage_quota_bytes: usize,
}

impl Default for SimlabSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            data_dir: DATA_DIR.clone(),
            cache_ttl: Duration::from_secs(CACHE_TTL_HOURS * 60 * 60),
            cache_max_entries: CACHE_MAX_ENTRIES,
            history_max_entries: HISTORY_MAX_ENTRIES,
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
        }
    }
}

impl SimlabSettings {
    /// Construct a settings snapshot from process environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = std::env::var("SIMLAB_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        Self {
            api_base: std::env::var("SIMLAB_API_BASE")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.api_base),
            data_dir,
            cache_ttl: read_parsed::<u64>("SIMLAB_CACHE_TTL_HOURS")
                .map(|h| Duration::from_secs(h.saturating_mul(60 * 60)))
                .unwrap_or(defaults.cache_ttl),
            cache_max_entries: read_parsed("SIMLAB_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            history_max_entries: read_parsed("SIMLAB_HISTORY_MAX_ENTRIES")
                .unwrap_or(defaults.history_max_entries),
            storage_quota_bytes: read_parsed("SIMLAB_STORAGE_QUOTA_BYTES")
                .unwrap_or(defaults.storage_quota_bytes),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(STORE_DB)
    }

    /// Human-readable summary for diagnostics.
    pub fn summary(&self) -> String {
        format!(
            "api_base={}, data_dir={}, cache_ttl_s={}, cache_max_entries={}, history_max_entries={}, storage_quota_bytes={}",
            self.api_base,
            self.data_dir.display(),
            self.cache_ttl.as_secs(),
            self.cache_max_entries,
            self.history_max_entries,
            self.storage_quota_bytes,
        )
    }
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}
