//! Paired run history.
//!
//! Every completed run is stored as two entries, one per algorithm, sharing a
//! base id (`<base>-eaco`, `<base>-epso`). Entries are kept most-recent-first
//! in one JSON document inside the shared store.
//!
//! INVARIANT: a pair is never exposed half-present. Truncation drops whole
//! pairs and lookups are both-or-nothing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::limits::{HISTORY_DEGRADE_WINDOWS, HISTORY_MAX_ENTRIES};
use crate::config::paths::{HISTORY_DOCUMENT_VERSION, HISTORY_KEY};
use crate::errors::{SimError, SimResult};
use crate::model::{Algorithm, DataCenterConfig, PlotData, RunConfiguration, RunResult, RunSummary};
use crate::storage::{KvStore, StorageError};
use crate::ttest::NormalizedStatisticalResult;

/// Configuration as it was when the run started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfigSnapshot {
    #[serde(flatten)]
    pub data_center: DataCenterConfig,
    pub num_cloudlets: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    pub workload_type: String,
}

fn default_iterations() -> u32 {
    1
}

impl From<&RunConfiguration> for HistoryConfigSnapshot {
    fn from(config: &RunConfiguration) -> Self {
        Self {
            data_center: config.data_center.clone(),
            num_cloudlets: config.num_cloudlets,
            iterations: config.iterations,
            workload_type: config.workload.workload_type().to_string(),
        }
    }
}

/// Plot facts worth keeping without the images themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotAnalysis {
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub simulation_id: Option<String>,
    #[serde(default)]
    pub metrics: Option<Value>,
    pub plot_count: usize,
    #[serde(default)]
    pub plot_types: Vec<String>,
    #[serde(default)]
    pub plot_metadata: Vec<Value>,
    #[serde(default)]
    pub analysis: Option<Value>,
    pub has_plots: bool,
}

impl PlotAnalysis {
    fn from_result(result: &RunResult) -> Option<Self> {
        let plot: &PlotData = result.plot_data.as_ref()?;
        Some(Self {
            algorithm: plot.algorithm.clone(),
            simulation_id: plot.simulation_id.clone(),
            metrics: plot.metrics.clone(),
            plot_count: plot.plot_paths.len(),
            plot_types: plot.plot_types(),
            plot_metadata: plot.plot_metadata.clone(),
            analysis: result.analysis.clone(),
            has_plots: !plot.plot_paths.is_empty(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub base_id: String,
    pub timestamp: DateTime<Utc>,
    pub algorithm: Algorithm,
    pub config: HistoryConfigSnapshot,
    #[serde(default)]
    pub raw_results: Value,
    #[serde(default)]
    pub summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_consumption: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_utilization: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_analysis: Option<PlotAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_test_results: Option<NormalizedStatisticalResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
}

impl HistoryEntry {
    fn from_result(
        base_id: &str,
        timestamp: DateTime<Utc>,
        result: &RunResult,
        config: &HistoryConfigSnapshot,
    ) -> Self {
        let raw = &result.raw_results;
        let pick = |key: &str| raw.get(key).filter(|v| !v.is_null()).cloned();
        Self {
            id: format!("{base_id}-{}", result.algorithm.slug()),
            base_id: base_id.to_string(),
            timestamp,
            algorithm: result.algorithm,
            config: config.clone(),
            raw_results: raw.clone(),
            summary: result.summary.clone(),
            energy_consumption: pick("energyConsumption"),
            vm_utilization: pick("vmUtilization"),
            scheduling_log: pick("schedulingLog"),
            plot_analysis: PlotAnalysis::from_result(result),
            t_test_results: result.t_test_results.clone(),
            simulation_id: result.simulation_id.clone(),
        }
    }
}

/// Both sides of one stored run.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPair {
    pub eaco: HistoryEntry,
    pub epso: HistoryEntry,
}

/// Portable export format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDocument {
    pub export_date: DateTime<Utc>,
    pub version: u32,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistorySort {
    #[default]
    NewestFirst,
    OldestFirst,
    MakespanAscending,
    MakespanDescending,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub algorithm: Option<Algorithm>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Case-insensitive match against id, algorithm, scheduler and workload type.
    pub text: Option<String>,
    pub sort: HistorySort,
}

impl HistoryFilter {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        if self.algorithm.is_some_and(|a| a != entry.algorithm) {
            return false;
        }
        if self.start.is_some_and(|s| entry.timestamp < s) {
            return false;
        }
        if self.end.is_some_and(|e| entry.timestamp > e) {
            return false;
        }
        match self.text.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                [
                    entry.id.as_str(),
                    entry.algorithm.as_str(),
                    entry.config.data_center.vm_scheduler.as_str(),
                    entry.config.workload_type.as_str(),
                ]
                .iter()
                .any(|hay| hay.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_entries: usize,
    pub simulation_runs: usize,
    pub max_entries: usize,
}

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub base_id: String,
    pub retained: usize,
    /// True when older history was dropped to fit the storage quota.
    pub degraded: bool,
}

/// Base id shared by both entries of a pair.
pub fn base_id_of(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

fn new_base_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", now.timestamp_millis(), &suffix[..6])
}

/// Drop entries whose partner did not survive truncation.
fn retain_complete_pairs(entries: &mut Vec<HistoryEntry>) {
    let mut sides: HashMap<&str, (bool, bool)> = HashMap::new();
    for e in entries.iter() {
        let slot = sides.entry(e.base_id.as_str()).or_default();
        match e.algorithm {
            Algorithm::Eaco => slot.0 = true,
            Algorithm::Epso => slot.1 = true,
        }
    }
    let complete: std::collections::HashSet<String> = sides
        .into_iter()
        .filter(|(_, (a, b))| *a && *b)
        .map(|(k, _)| k.to_string())
        .collect();
    entries.retain(|e| complete.contains(&e.base_id));
}

fn truncate_pairs(entries: &mut Vec<HistoryEntry>, max: usize) {
    if entries.len() > max {
        entries.truncate(max - max % 2);
    }
    retain_complete_pairs(entries);
}

pub struct HistoryStore {
    store: Arc<dyn KvStore>,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_max_entries(store, HISTORY_MAX_ENTRIES)
    }

    pub fn with_max_entries(store: Arc<dyn KvStore>, max_entries: usize) -> Self {
        Self {
            store,
            max_entries: max_entries.max(2),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Vec<HistoryEntry> {
        let raw = match self.store.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(target = "simlab", error = %err, "history read failed");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(target = "simlab", error = %err, "history document unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    fn write(&self, entries: &[HistoryEntry]) -> Result<(), StorageError> {
        let json = serde_json::to_string(entries)
            .map_err(|e| StorageError::Backend(format!("serialize history: {e}")))?;
        self.store.set(HISTORY_KEY, &json)
    }

    /// Persist `entries`, shrinking the retained window on quota failure.
    /// The first `protected` entries are always kept.
    fn persist_degrading(
        &self,
        mut entries: Vec<HistoryEntry>,
        protected: usize,
    ) -> SimResult<(usize, bool)> {
        match self.write(&entries) {
            Ok(()) => return Ok((entries.len(), false)),
            Err(StorageError::QuotaExceeded { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        for window in HISTORY_DEGRADE_WINDOWS {
            let window = window.max(protected);
            if window >= entries.len() {
                continue;
            }
            truncate_pairs(&mut entries, window);
            tracing::warn!(target = "simlab", window, "history quota exceeded, retrying with smaller window");
            match self.write(&entries) {
                Ok(()) => return Ok((entries.len(), true)),
                Err(StorageError::QuotaExceeded { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        if entries.len() > protected {
            entries.truncate(protected);
            retain_complete_pairs(&mut entries);
            tracing::warn!(target = "simlab", kept = entries.len(), "history quota exceeded, keeping only the newest run");
            match self.write(&entries) {
                Ok(()) => return Ok((entries.len(), true)),
                Err(StorageError::QuotaExceeded { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Err(SimError::QuotaExceeded)
    }

    /// Record a completed run. Returns the shared base id.
    pub fn append(
        &self,
        eaco: &RunResult,
        epso: &RunResult,
        config: &RunConfiguration,
    ) -> SimResult<AppendOutcome> {
        self.append_at(eaco, epso, config, Utc::now())
    }

    pub fn append_at(
        &self,
        eaco: &RunResult,
        epso: &RunResult,
        config: &RunConfiguration,
        now: DateTime<Utc>,
    ) -> SimResult<AppendOutcome> {
        if eaco.algorithm != Algorithm::Eaco || epso.algorithm != Algorithm::Epso {
            return Err(SimError::Run("history pair must hold one EACO and one EPSO result".into()));
        }
        let _guard = self.write_lock.lock();
        let base_id = new_base_id(now);
        let snapshot = HistoryConfigSnapshot::from(config);
        let mut entries = vec![
            HistoryEntry::from_result(&base_id, now, eaco, &snapshot),
            HistoryEntry::from_result(&base_id, now, epso, &snapshot),
        ];
        entries.extend(self.load());
        truncate_pairs(&mut entries, self.max_entries);

        let (retained, degraded) = self.persist_degrading(entries, 2)?;
        tracing::info!(target = "simlab", base_id = %base_id, retained, degraded, "saved run to history");
        Ok(AppendOutcome {
            base_id,
            retained,
            degraded,
        })
    }

    /// Most-recent-first.
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.load()
    }

    /// Both sides of the run that `id` (entry id or base id) belongs to.
    pub fn find_pair(&self, id: &str) -> Option<HistoryPair> {
        let base = base_id_of(id);
        let entries = self.load();
        let side = |alg: Algorithm| {
            entries
                .iter()
                .find(|e| e.base_id == base && e.algorithm == alg)
                .cloned()
        };
        Some(HistoryPair {
            eaco: side(Algorithm::Eaco)?,
            epso: side(Algorithm::Epso)?,
        })
    }

    /// Delete both sides of a pair. No-op when absent.
    pub fn remove(&self, id: &str) -> SimResult<bool> {
        self.delete_many(&[id]).map(|n| n > 0)
    }

    /// Bulk deletion by entry or base ids. Returns the number of entries removed.
    pub fn delete_many(&self, ids: &[&str]) -> SimResult<usize> {
        let _guard = self.write_lock.lock();
        let bases: std::collections::HashSet<&str> = ids.iter().map(|id| base_id_of(id)).collect();
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|e| !bases.contains(e.base_id.as_str()));
        let removed = before - entries.len();
        if removed > 0 {
            self.write(&entries)?;
            tracing::info!(target = "simlab", removed, "deleted history entries");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> SimResult<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(HISTORY_KEY)?;
        tracing::info!(target = "simlab", "history cleared");
        Ok(())
    }

    pub fn export(&self) -> HistoryDocument {
        HistoryDocument {
            export_date: Utc::now(),
            version: HISTORY_DOCUMENT_VERSION,
            entries: self.load(),
        }
    }

    pub fn export_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    /// Prepend the document's entries to existing history. Does not deduplicate.
    /// Returns how many imported entries were kept; half pairs and entries
    /// past the cap are dropped.
    pub fn import(&self, document: HistoryDocument) -> SimResult<usize> {
        let _guard = self.write_lock.lock();
        let offered = document.entries.len();
        let mut entries = document.entries;
        truncate_pairs(&mut entries, self.max_entries);
        let imported = entries.len();
        if imported < offered {
            tracing::warn!(
                target = "simlab",
                offered,
                kept = imported,
                "dropped incomplete or over-cap history entries on import"
            );
        }
        if imported == 0 {
            return Ok(0);
        }
        entries.extend(self.load());
        truncate_pairs(&mut entries, self.max_entries);
        let (retained, _) = self.persist_degrading(entries, imported)?;
        let kept = imported.min(retained);
        tracing::info!(target = "simlab", imported = kept, "imported history entries");
        Ok(kept)
    }

    pub fn import_json(&self, raw: &str) -> SimResult<usize> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| SimError::InvalidDocument(e.to_string()))?;
        if !value.get("entries").is_some_and(Value::is_array) {
            return Err(SimError::InvalidDocument("missing entries array".into()));
        }
        let document: HistoryDocument = serde_json::from_value(value)
            .map_err(|e| SimError::InvalidDocument(e.to_string()))?;
        self.import(document)
    }

    pub fn search(&self, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        let mut hits: Vec<HistoryEntry> = self
            .load()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        match filter.sort {
            HistorySort::NewestFirst => hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            HistorySort::OldestFirst => hits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            HistorySort::MakespanAscending | HistorySort::MakespanDescending => {
                let key = |e: &HistoryEntry| e.summary.makespan.unwrap_or(f64::INFINITY);
                hits.sort_by(|a, b| key(a).total_cmp(&key(b)));
                if filter.sort == HistorySort::MakespanDescending {
                    hits.reverse();
                }
            }
        }
        hits
    }

    pub fn stats(&self) -> HistoryStats {
        let total_entries = self.load().len();
        HistoryStats {
            total_entries,
            simulation_runs: total_entries / 2,
            max_entries: self.max_entries,
        }
    }
}
