use thiserror::Error;

use crate::config::errors::{
    ERR_CANCELLED, ERR_CONFIG, ERR_DECODE, ERR_HTTP_STATUS, ERR_INVALID_DOCUMENT, ERR_QUOTA_EXCEEDED,
    ERR_RUN_FAILED, ERR_STORAGE, ERR_TRANSPORT, ERR_VALIDATION, ERR_WARMING_UP,
};
use crate::storage::StorageError;
use crate::validation::ValidationErrors;

pub type SimResult<T> = Result<T, SimError>;

/// Failure taxonomy for a simulation run.
///
/// Validation and storage errors are handled where they are detected; the
/// remaining variants propagate to the orchestrator, which decides the state
/// transition and the user-facing message.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration is invalid: {0}")]
    Validation(ValidationErrors),
    /// The backend reported a transient warm-up state.
    #[error("simulation backend is warming up")]
    WarmingUp,
    #[error("simulation was cancelled")]
    Cancelled,
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("simulation failed: {0}")]
    Run(String),
    #[error("server responded with {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid history document: {0}")]
    InvalidDocument(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SimError {
    pub fn code(&self) -> &'static str {
        match self {
            SimError::Validation(_) => ERR_VALIDATION,
            SimError::WarmingUp => ERR_WARMING_UP,
            SimError::Cancelled => ERR_CANCELLED,
            SimError::QuotaExceeded => ERR_QUOTA_EXCEEDED,
            SimError::Run(_) => ERR_RUN_FAILED,
            SimError::Http { .. } => ERR_HTTP_STATUS,
            SimError::Transport(_) => ERR_TRANSPORT,
            SimError::Decode(_) => ERR_DECODE,
            SimError::Storage(_) => ERR_STORAGE,
            SimError::InvalidDocument(_) => ERR_INVALID_DOCUMENT,
            SimError::Config(_) => ERR_CONFIG,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SimError::Cancelled)
    }

    /// Transient states the orchestrator retries locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, SimError::WarmingUp)
    }
}

impl From<StorageError> for SimError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QuotaExceeded { .. } => SimError::QuotaExceeded,
            StorageError::Backend(msg) => SimError::Storage(msg),
        }
    }
}
