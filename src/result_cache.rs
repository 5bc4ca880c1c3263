use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::limits::{CACHE_MAX_ENTRIES, CACHE_TTL_HOURS};
use crate::config::paths::{CACHE_PREFIX, CACHE_VERSION};
use crate::model::{RunConfiguration, RunPair, SimulationMode};
use crate::storage::{KvStore, StorageError};

/// Deterministic cache key for one configuration and mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_number(n: &serde_json::Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        // 2500.0 and 2500 must hash the same.
        if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&f.to_string());
        }
    } else {
        out.push_str(&n.to_string());
    }
}

/// Canonicalize JSON deterministically (keys sorted, integral floats as integers).
pub fn canonicalize_input(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => write_number(n, out),
            Value::String(s) => {
                out.push('"');
                for ch in s.chars() {
                    match ch {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Value::Array(arr) => {
                out.push('[');
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(v, out);
                }
                out.push(']');
            }
            Value::Object(map) => {
                out.push('{');
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(&Value::String(k.clone()), out);
                    out.push(':');
                    write(v, out);
                }
                out.push('}');
            }
        }
    }
    let mut out = String::with_capacity(256);
    write(value, &mut out);
    out
}

/// Fields the backend actually uses to compute results.
fn material_fields(config: &RunConfiguration, mode: SimulationMode) -> Value {
    let dc = &config.data_center;
    json!({
        "numHosts": dc.num_hosts,
        "numVMs": dc.num_vms,
        "numPesPerHost": dc.num_pes_per_host,
        "peMips": dc.pe_mips,
        "ramPerHost": dc.ram_per_host,
        "bwPerHost": dc.bw_per_host,
        "storagePerHost": dc.storage_per_host,
        "vmMips": dc.vm_mips,
        "vmPes": dc.vm_pes,
        "vmRam": dc.vm_ram,
        "vmBw": dc.vm_bw,
        "vmSize": dc.vm_size,
        "vmScheduler": dc.vm_scheduler.as_str(),
        "numCloudlets": config.num_cloudlets,
        "iterations": config.iterations,
        "workloadId": config.workload.identifier(),
        "enablePlots": config.enable_plots,
        "simulationType": mode.tag(),
    })
}

/// Hash an already-assembled material object.
pub fn fingerprint_value(material: &Value) -> Fingerprint {
    let canonical = canonicalize_input(material);
    let mut hasher = Sha256::new();
    hasher.update(CACHE_VERSION.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    Fingerprint(format!("{CACHE_PREFIX}{CACHE_VERSION}_{}", &digest[..16]))
}

pub fn compute_fingerprint(config: &RunConfiguration, mode: SimulationMode) -> Fingerprint {
    fingerprint_value(&material_fields(config, mode))
}

/// Small summary of the configuration kept next to a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDigest {
    pub iterations: u32,
    #[serde(rename = "numVMs")]
    pub num_vms: u32,
    pub num_cloudlets: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: Fingerprint,
    #[serde(rename = "timestamp")]
    pub created_at_ms: i64,
    pub config: ConfigDigest,
    pub results: RunPair,
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRun {
    pub key: Fingerprint,
    pub cached_at_ms: i64,
    pub results: RunPair,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryInfo {
    pub key: String,
    pub timestamp: i64,
    pub config: Option<ConfigDigest>,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_cached: usize,
    pub total_size: usize,
    pub total_size_formatted: String,
    pub oldest_entry: Option<CacheEntryInfo>,
    pub newest_entry: Option<CacheEntryInfo>,
    pub entries: Vec<CacheEntryInfo>,
}

pub fn format_bytes(bytes: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".into();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Best-effort memo of completed runs. Never a correctness requirement:
/// every failure degrades to a miss or a dropped write.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_limits(
            store,
            Duration::from_secs(CACHE_TTL_HOURS * 60 * 60),
            CACHE_MAX_ENTRIES,
        )
    }

    pub fn with_limits(store: Arc<dyn KvStore>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            store,
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, config: &RunConfiguration, mode: SimulationMode) -> Option<CachedRun> {
        self.get_at(config, mode, Utc::now().timestamp_millis())
    }

    /// Lookup evaluated at `now_ms`. Stale or corrupt entries are removed.
    pub fn get_at(
        &self,
        config: &RunConfiguration,
        mode: SimulationMode,
        now_ms: i64,
    ) -> Option<CachedRun> {
        let key = compute_fingerprint(config, mode);
        let raw = match self.store.get(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(target = "simlab", key = %key, "cache miss");
                return None;
            }
            Err(err) => {
                tracing::warn!(target = "simlab", key = %key, error = %err, "cache read failed");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(target = "simlab", key = %key, error = %err, "corrupt cache entry removed");
                let _ = self.store.remove(key.as_str());
                return None;
            }
        };
        let age_ms = now_ms.saturating_sub(entry.created_at_ms);
        if age_ms > 0 && age_ms as u128 > self.ttl.as_millis() {
            tracing::info!(target = "simlab", key = %key, age_ms, "cache entry expired");
            let _ = self.store.remove(key.as_str());
            return None;
        }
        tracing::info!(target = "simlab", key = %key, cached_at = entry.created_at_ms, "cache hit");
        Some(CachedRun {
            key,
            cached_at_ms: entry.created_at_ms,
            results: entry.results,
        })
    }

    pub fn put(&self, config: &RunConfiguration, mode: SimulationMode, results: &RunPair) -> bool {
        self.put_at(config, mode, results, Utc::now().timestamp_millis())
    }

    /// Store a completed pair (plot images stripped). Returns whether it was written.
    pub fn put_at(
        &self,
        config: &RunConfiguration,
        mode: SimulationMode,
        results: &RunPair,
        now_ms: i64,
    ) -> bool {
        let key = compute_fingerprint(config, mode);
        let entry = CacheEntry {
            key: key.clone(),
            created_at_ms: now_ms,
            config: ConfigDigest {
                iterations: config.iterations,
                num_vms: config.data_center.num_vms,
                num_cloudlets: config.num_cloudlets,
            },
            results: results.without_binary_artifacts(),
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(target = "simlab", key = %key, error = %err, "cache serialize failed");
                return false;
            }
        };

        let written = match self.store.set(key.as_str(), &json) {
            Ok(()) => true,
            Err(StorageError::QuotaExceeded { .. }) => {
                tracing::info!(target = "simlab", key = %key, "cache quota exceeded, evicting oldest entry");
                let evicted = self.evict_oldest(Some(&key));
                evicted && self.store.set(key.as_str(), &json).is_ok()
            }
            Err(err) => {
                tracing::warn!(target = "simlab", key = %key, error = %err, "cache write failed");
                false
            }
        };

        if written {
            self.enforce_ceiling();
        } else {
            tracing::warn!(target = "simlab", key = %key, "cache write dropped");
        }
        written
    }

    /// (key, created_at) for every readable entry, oldest first. Corrupt entries are removed.
    fn entries_oldest_first(&self) -> Vec<(String, i64)> {
        let keys = match self.store.keys_with_prefix(CACHE_PREFIX) {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(target = "simlab", error = %err, "cache key scan failed");
                return Vec::new();
            }
        };
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Ok(Some(raw)) = self.store.get(&key) else {
                continue;
            };
            match serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| v.get("timestamp").and_then(Value::as_i64))
            {
                Some(ts) => entries.push((key, ts)),
                None => {
                    let _ = self.store.remove(&key);
                }
            }
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    fn evict_oldest(&self, keep: Option<&Fingerprint>) -> bool {
        let oldest = self
            .entries_oldest_first()
            .into_iter()
            .find(|(key, _)| keep.map(|k| k.as_str() != key).unwrap_or(true));
        match oldest {
            Some((key, _)) => {
                tracing::info!(target = "simlab", key = %key, "evicted oldest cache entry");
                self.store.remove(&key).is_ok()
            }
            None => false,
        }
    }

    fn enforce_ceiling(&self) {
        let mut entries = self.entries_oldest_first();
        while entries.len() > self.max_entries {
            let (key, _) = entries.remove(0);
            if self.store.remove(&key).is_ok() {
                tracing::debug!(target = "simlab", key = %key, "removed old cache entry");
            }
        }
    }

    pub fn clear_all(&self) -> usize {
        let keys = self.store.keys_with_prefix(CACHE_PREFIX).unwrap_or_default();
        let removed = keys
            .iter()
            .filter(|key| self.store.remove(key).is_ok())
            .count();
        tracing::info!(target = "simlab", removed, "cleared cached results");
        removed
    }

    pub fn len(&self) -> usize {
        self.store
            .keys_with_prefix(CACHE_PREFIX)
            .map(|k| k.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for key in self.store.keys_with_prefix(CACHE_PREFIX).unwrap_or_default() {
            let Ok(Some(raw)) = self.store.get(&key) else {
                continue;
            };
            stats.total_cached += 1;
            stats.total_size += raw.len();
            let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let info = CacheEntryInfo {
                key: key.clone(),
                timestamp: parsed.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
                config: parsed
                    .get("config")
                    .and_then(|c| serde_json::from_value(c.clone()).ok()),
                size: raw.len(),
            };
            if stats
                .oldest_entry
                .as_ref()
                .map_or(true, |o| info.timestamp < o.timestamp)
            {
                stats.oldest_entry = Some(info.clone());
            }
            if stats
                .newest_entry
                .as_ref()
                .map_or(true, |n| info.timestamp > n.timestamp)
            {
                stats.newest_entry = Some(info.clone());
            }
            stats.entries.push(info);
        }
        stats.total_size_formatted = format_bytes(stats.total_size);
        stats
    }
}
