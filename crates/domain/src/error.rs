//! Error types for the recommendation engine.

use thiserror::Error;

use crate::types::CustomerId;

/// Errors surfaced to callers of the orchestrator.
///
/// Source-level failures never appear here: the gateway absorbs them into
/// degraded results. Only customer lookup misses, deadline overruns, and
/// unrecoverable stage failures escape the pipeline.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The customer directory has no profile for this identifier
    #[error("Customer {0} not found")]
    CustomerNotFound(CustomerId),

    /// The pipeline exceeded its overall deadline before validation started
    #[error("Recommendation generation exceeded {deadline_ms}ms deadline")]
    Timeout { deadline_ms: u64 },

    /// A stage produced malformed output (e.g. confidence outside [0, 1]).
    /// Fatal and non-retryable; the run is discarded without persisting.
    #[error("Inconsistent stage output: {0}")]
    Inconsistent(String),

    /// Unrecoverable internal failure (task panic, persistence failure)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures from an external data source, handled by the gateway
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Circuit is open or the source rejected the call; no data available
    #[error("Source '{source_name}' is unavailable")]
    Unavailable { source_name: String },

    /// The call did not complete within its per-call timeout
    #[error("Call to '{source_name}' timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    /// The source answered with an error
    #[error("Source '{source_name}' call failed: {reason}")]
    Failed { source_name: String, reason: String },
}

impl SourceError {
    /// Source identifier this error pertains to
    pub fn source(&self) -> &str {
        match self {
            Self::Unavailable { source_name } => source_name,
            Self::Timeout { source_name, .. } => source_name,
            Self::Failed { source_name, .. } => source_name,
        }
    }
}

/// Convenience alias for results at the engine boundary
pub type EngineResult<T> = std::result::Result<T, EngineError>;
