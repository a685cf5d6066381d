//! Pipeline error taxonomy.
//!
//! Checker findings are never errors; they travel in verdicts. The variants
//! here are request problems (unknown or closed session, bad confirmation
//! reference, cancellation before acceptance) and infrastructure failures.
//! Infrastructure failures carry the attempt's correlation id so a caller can
//! quote it without seeing internal detail.

use uuid::Uuid;

use rigor_ledger::{SessionId, StorageError};

use crate::config::ConfigError;
use crate::gate::GateError;
use crate::sandbox::SandboxError;

/// Errors returned by [`crate::RigorPipeline`] operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session is closed: {0}")]
    SessionClosed(SessionId),

    #[error("session already exists: {0}")]
    SessionExists(SessionId),

    #[error("submission cancelled before it was accepted")]
    Cancelled,

    #[error("ledger write failed for attempt {correlation_id}: {source}")]
    LedgerWrite {
        correlation_id: Uuid,
        #[source]
        source: StorageError,
    },

    #[error("sandbox unavailable for attempt {correlation_id}: {source}")]
    SandboxUnavailable {
        correlation_id: Uuid,
        #[source]
        source: SandboxError,
    },

    #[error("invalid confirmation: {0}")]
    Gate(#[from] GateError),

    #[error("provider failed: {0}")]
    Provider(String),

    #[error("ledger error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Correlation id of the failed attempt, for infrastructure failures.
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            PipelineError::LedgerWrite { correlation_id, .. }
            | PipelineError::SandboxUnavailable { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    /// Text safe to show a caller. Infrastructure detail stays in the log.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::LedgerWrite { correlation_id, .. } => format!(
                "The submission could not be recorded and was not accepted. Reference: {correlation_id}"
            ),
            PipelineError::SandboxUnavailable { correlation_id, .. } => format!(
                "The execution environment is unavailable. Reference: {correlation_id}"
            ),
            PipelineError::Storage(_) | PipelineError::Io(_) | PipelineError::Provider(_) => {
                "Internal error while processing the request.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
