pub mod backend;
pub mod config;
pub mod errors;
pub mod events;
pub mod history;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod result_cache;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod ttest;
pub mod validation;

pub use backend::{
    ArtifactStatus, AsyncRun, ComparisonResponse, HttpBackend, ProgressReport, RunArtifacts,
    SimulationBackend,
};
pub use config::SimlabSettings;
pub use errors::{SimError, SimResult};
pub use events::{EventBus, RunEvent};
pub use history::{HistoryDocument, HistoryEntry, HistoryFilter, HistoryPair, HistoryStore};
pub use job::{ArtifactOutcome, ArtifactTracker, CancelToken};
pub use model::{
    Algorithm, DataCenterConfig, PlotData, RunConfiguration, RunPair, RunResult, RunSummary,
    SimulationMode, VmScheduler, WorkloadFile, WorkloadSource,
};
pub use orchestrator::{Orchestrator, OrchestratorOptions, RunOutcome, RunState, Strategy};
pub use progress::{ProgressState, Stage};
pub use result_cache::{CacheStats, Fingerprint, ResultCache};
pub use session::{ResumeSnapshot, SessionStore};
pub use storage::{KvStore, MemoryStore, SqliteStore, StorageError};
pub use telemetry::{init_tracing, log_error, log_info, log_warn};
pub use validation::{validate_config, ValidationErrors};

// Scripted backend for unit tests; integration suites use an HTTP mock instead.
#[cfg(test)]
mod test_support;
