//! Pipeline error taxonomy
//!
//! Transient classes are retried locally with backoff; everything else
//! surfaces as a terminal run status with a structured reason. Individual
//! malformed records are the only silently-skipped failures, and only up to
//! the configured cap.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Error classes the orchestrator dispatches on
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network failure or upstream 5xx; retried with backoff
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// Upstream 429 after the retry budget is exhausted
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// Dropped-record count crossed the configured cap
    #[error("data quality defects ({defects}) exceeded cap ({cap})")]
    DataQualityCapExceeded { defects: u64, cap: u64 },

    /// Canonical-store transaction failure after batch-level retries
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    /// A run is already holding the exclusivity lease
    #[error("run already in progress (held by {owner})")]
    RunAlreadyInProgress { owner: String },

    /// Persisted checkpoint is unreadable; an explicit FULL run is required
    #[error("checkpoint corrupted: {0}")]
    CheckpointCorruption(String),

    /// Raw archive write or read failure
    #[error("archive error: {0}")]
    Archive(String),

    /// Canonical-store access failure outside a reconciliation batch
    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operator-issued cancellation
    #[error("run cancelled by operator")]
    Cancelled,
}

impl PipelineError {
    /// Whether a single retry of the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientUpstream(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::TransientUpstream(err.to_string())
    }
}
