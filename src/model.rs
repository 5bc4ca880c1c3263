//! Run configuration, simulation mode and per-algorithm result types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::limits::COMPARISON_ITERATION_THRESHOLD;
use crate::ttest::NormalizedStatisticalResult;

// ----------------------------------------------------------------------------
// Algorithms
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "EACO")]
    Eaco,
    #[serde(rename = "EPSO")]
    Epso,
}

impl Algorithm {
    /// Both algorithms in the order they are dispatched.
    pub const BOTH: [Algorithm; 2] = [Algorithm::Eaco, Algorithm::Epso];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Eaco => "EACO",
            Algorithm::Epso => "EPSO",
        }
    }

    /// Lower-case form used in history entry ids.
    pub fn slug(&self) -> &'static str {
        match self {
            Algorithm::Eaco => "eaco",
            Algorithm::Epso => "epso",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EACO" => Some(Algorithm::Eaco),
            "EPSO" => Some(Algorithm::Epso),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VmScheduler {
    #[default]
    TimeShared,
    SpaceShared,
}

impl VmScheduler {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmScheduler::TimeShared => "TimeShared",
            VmScheduler::SpaceShared => "SpaceShared",
        }
    }
}

/// Infrastructure parameters sent to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCenterConfig {
    pub num_hosts: u32,
    pub num_pes_per_host: u32,
    pub pe_mips: f64,
    pub ram_per_host: u64,
    pub bw_per_host: u64,
    pub storage_per_host: u64,
    #[serde(rename = "numVMs")]
    pub num_vms: u32,
    pub vm_mips: f64,
    pub vm_pes: u32,
    pub vm_ram: u64,
    pub vm_bw: u64,
    pub vm_size: u64,
    #[serde(default)]
    pub vm_scheduler: VmScheduler,
}

impl Default for DataCenterConfig {
    fn default() -> Self {
        Self {
            num_hosts: 20,
            num_pes_per_host: 8,
            pe_mips: 2500.0,
            ram_per_host: 4096,
            bw_per_host: 10_000,
            storage_per_host: 200_000,
            num_vms: 50,
            vm_mips: 1000.0,
            vm_pes: 2,
            vm_ram: 1024,
            vm_bw: 1000,
            vm_size: 10_000,
            vm_scheduler: VmScheduler::TimeShared,
        }
    }
}

pub const PRESET_NAMES: [&str; 5] = ["default", "1k-tasks", "5k-tasks", "10k-tasks", "20k-tasks"];

impl DataCenterConfig {
    /// Named sizing presets offered alongside the default configuration.
    pub fn preset(name: &str) -> Option<Self> {
        #[allow(clippy::type_complexity)]
        let row: (u32, u32, f64, u64, u64, u64, u32, f64, u32, u64, u64, u64) = match name {
            "default" => return Some(Self::default()),
            "1k-tasks" => (10, 4, 2000.0, 2048, 5000, 100_000, 20, 800.0, 1, 512, 500, 5000),
            "5k-tasks" => (20, 6, 2500.0, 4096, 10_000, 200_000, 50, 1000.0, 2, 1024, 1000, 10_000),
            "10k-tasks" => (40, 8, 3000.0, 8192, 20_000, 500_000, 100, 1500.0, 2, 2048, 2000, 20_000),
            "20k-tasks" => (80, 12, 3500.0, 16_384, 40_000, 1_000_000, 200, 2000.0, 4, 4096, 4000, 40_000),
            _ => return None,
        };
        Some(Self {
            num_hosts: row.0,
            num_pes_per_host: row.1,
            pe_mips: row.2,
            ram_per_host: row.3,
            bw_per_host: row.4,
            storage_per_host: row.5,
            num_vms: row.6,
            vm_mips: row.7,
            vm_pes: row.8,
            vm_ram: row.9,
            vm_bw: row.10,
            vm_size: row.11,
            vm_scheduler: VmScheduler::TimeShared,
        })
    }
}

/// An uploaded workload dataset. Identified by name and byte size, never by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadFile {
    pub name: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkloadSource {
    #[default]
    Synthetic,
    Uploaded(WorkloadFile),
}

impl WorkloadSource {
    pub fn file(&self) -> Option<&WorkloadFile> {
        match self {
            WorkloadSource::Synthetic => None,
            WorkloadSource::Uploaded(file) => Some(file),
        }
    }

    /// Stable identifier used in fingerprints.
    pub fn identifier(&self) -> String {
        match self {
            WorkloadSource::Synthetic => "synthetic".to_string(),
            WorkloadSource::Uploaded(f) => format!("file_{}_{}", f.name, f.size_bytes),
        }
    }

    /// Value of the backend `workloadType` parameter.
    pub fn workload_type(&self) -> &'static str {
        match self {
            WorkloadSource::Synthetic => "Random",
            WorkloadSource::Uploaded(_) => "CSV",
        }
    }
}

/// Everything needed to start one paired run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfiguration {
    pub data_center: DataCenterConfig,
    pub num_cloudlets: u32,
    #[serde(default)]
    pub workload: WorkloadSource,
    pub iterations: u32,
    #[serde(default)]
    pub enable_plots: bool,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            data_center: DataCenterConfig::default(),
            num_cloudlets: 100,
            workload: WorkloadSource::Synthetic,
            iterations: 1,
            enable_plots: false,
        }
    }
}

impl RunConfiguration {
    /// Flat parameter object the simulator endpoints accept.
    pub fn request_params(&self, algorithm: Option<Algorithm>) -> Map<String, Value> {
        let dc = &self.data_center;
        let mut params = match json!({
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
            "numCloudlets": self.num_cloudlets,
            "workloadType": self.workload.workload_type(),
            "useDefaultWorkload": self.workload.file().is_none(),
            "iterations": self.iterations.max(1),
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(algorithm) = algorithm {
            params.insert(
                "optimizationAlgorithm".into(),
                Value::String(algorithm.as_str().into()),
            );
        }
        params
    }
}

// ----------------------------------------------------------------------------
// Simulation mode
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModeKind {
    Single,
    Iterative,
    Comparison,
}

/// Derived from a configuration; never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMode {
    pub kind: ModeKind,
    pub with_workload_file: bool,
}

impl SimulationMode {
    pub fn derive(config: &RunConfiguration) -> Self {
        let kind = if config.iterations >= COMPARISON_ITERATION_THRESHOLD {
            ModeKind::Comparison
        } else if config.iterations > 1 {
            ModeKind::Iterative
        } else {
            ModeKind::Single
        };
        Self {
            kind,
            with_workload_file: config.workload.file().is_some(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match (self.kind, self.with_workload_file) {
            (ModeKind::Single, false) => "raw",
            (ModeKind::Single, true) => "with-file",
            (ModeKind::Iterative, false) => "iterations",
            (ModeKind::Iterative, true) => "iterations-with-file",
            (ModeKind::Comparison, false) => "compare",
            (ModeKind::Comparison, true) => "compare-with-file",
        }
    }
}

// ----------------------------------------------------------------------------
// Results
// ----------------------------------------------------------------------------

/// Headline metrics derived from a raw backend result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub makespan: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_response_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_utilization: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_consumption: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imbalance_degree: Option<f64>,
}

fn number_at(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::Object(_) => v.get("totalEnergyWh").and_then(Value::as_f64),
            _ => None,
        })
}

impl RunSummary {
    /// Reads `summary`, falling back to `averageMetrics` for iteration results.
    pub fn from_raw(raw: &Value) -> Self {
        let summary = raw
            .get("summary")
            .or_else(|| raw.get("averageMetrics"))
            .filter(|v| v.is_object())
            .unwrap_or(raw);
        let energy = number_at(summary, &["energyConsumption", "totalEnergyWh", "energy"])
            .or_else(|| number_at(raw, &["energyConsumption"]));
        Self {
            makespan: number_at(summary, &["makespan"]),
            average_response_time: number_at(
                summary,
                &["averageResponseTime", "avgResponseTime", "responseTime"],
            ),
            resource_utilization: number_at(summary, &["resourceUtilization", "utilization"]),
            energy_consumption: energy,
            imbalance_degree: number_at(summary, &["imbalanceDegree", "loadBalance"]),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "makespan" => self.makespan,
            "responseTime" => self.average_response_time,
            "resourceUtilization" => self.resource_utilization,
            "energyConsumption" => self.energy_consumption,
            "imbalanceDegree" | "loadBalance" => self.imbalance_degree,
            _ => None,
        }
    }
}

/// Plot artifacts produced for one algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
    #[serde(default)]
    pub plot_paths: Vec<String>,
    #[serde(default)]
    pub plot_metadata: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    /// Encoded image payloads. Never cached or written to history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl PlotData {
    pub fn has_plots(&self) -> bool {
        !self.plot_paths.is_empty() || !self.images.is_empty()
    }

    pub fn plot_types(&self) -> Vec<String> {
        self.plot_metadata
            .iter()
            .filter_map(|m| m.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub algorithm: Algorithm,
    #[serde(default)]
    pub raw_results: Value,
    #[serde(default)]
    pub summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_test_results: Option<NormalizedStatisticalResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_data: Option<PlotData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub is_iteration_result: bool,
    #[serde(default)]
    pub plots_generating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
}

impl RunResult {
    pub fn new(algorithm: Algorithm, raw_results: Value) -> Self {
        let summary = RunSummary::from_raw(&raw_results);
        let simulation_id = raw_results
            .get("simulationId")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            algorithm,
            raw_results,
            summary,
            t_test_results: None,
            plot_data: None,
            analysis: None,
            simulation_id,
            execution_time_ms: None,
            is_iteration_result: false,
            plots_generating: false,
            tracking_id: None,
        }
    }

    /// Interpret any of the response envelopes the simulator returns.
    pub fn from_response(algorithm: Algorithm, response: Value) -> Self {
        let raw = response
            .get("simulationResults")
            .or_else(|| response.get("rawResults"))
            .filter(|v| v.is_object())
            .cloned();
        let is_iteration = response.get("totalIterations").is_some();
        let mut result = RunResult::new(algorithm, raw.unwrap_or_else(|| response.clone()));
        result.is_iteration_result = is_iteration;

        if let Some(plot) = response.get("plotData").filter(|v| v.is_object()) {
            let mut plot_data: PlotData =
                serde_json::from_value(plot.clone()).unwrap_or_default();
            if let Some(Value::Array(meta)) = response.get("plotMetadata") {
                plot_data.plot_metadata = meta.clone();
            }
            result.plot_data = Some(plot_data);
        }
        result.analysis = response.get("analysis").filter(|v| !v.is_null()).cloned();
        if result.simulation_id.is_none() {
            result.simulation_id = response
                .get("simulationId")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        result.execution_time_ms = response
            .get("executionTimeMs")
            .or_else(|| result.raw_results.get("executionTimeMs"))
            .and_then(Value::as_u64);
        result
    }

    /// Drop encoded plot images, keeping their metadata.
    pub fn strip_binary_artifacts(&mut self) {
        if let Some(plot) = self.plot_data.as_mut() {
            plot.images.clear();
        }
    }
}

/// Results for both algorithms of one run. Always complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPair {
    pub eaco: RunResult,
    pub epso: RunResult,
}

impl RunPair {
    pub fn new(eaco: RunResult, epso: RunResult) -> Self {
        Self { eaco, epso }
    }

    pub fn get(&self, algorithm: Algorithm) -> &RunResult {
        match algorithm {
            Algorithm::Eaco => &self.eaco,
            Algorithm::Epso => &self.epso,
        }
    }

    pub fn get_mut(&mut self, algorithm: Algorithm) -> &mut RunResult {
        match algorithm {
            Algorithm::Eaco => &mut self.eaco,
            Algorithm::Epso => &mut self.epso,
        }
    }

    pub fn without_binary_artifacts(&self) -> Self {
        let mut copy = self.clone();
        copy.eaco.strip_binary_artifacts();
        copy.epso.strip_binary_artifacts();
        copy.eaco.plots_generating = false;
        copy.epso.plots_generating = false;
        copy
    }

    pub fn plots_pending(&self) -> bool {
        self.eaco.plots_generating || self.epso.plots_generating
    }
}
