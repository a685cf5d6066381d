//! Error types for rigor-ledger

use thiserror::Error;

/// Errors that can occur in the ledger persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record with this sequence number exists in the session
    #[error("record {seq} not found in session {session_id}")]
    RecordNotFound { session_id: String, seq: u64 },

    /// The record violates the ledger invariants and was not appended
    #[error("ledger invariant violated: {reason}")]
    InvariantViolation { reason: String },

    /// Digest string is not 64 lowercase hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// A persisted line could not be decoded
    #[error("corrupt ledger for session {session_id} at line {line}: {reason}")]
    Corrupt {
        session_id: String,
        line: usize,
        reason: String,
    },

    /// The hash chain or sequence numbering does not verify
    #[error("ledger chain broken for session {session_id} at seq {seq}: {reason}")]
    ChainBroken {
        session_id: String,
        seq: u64,
        reason: String,
    },

    /// Backend-specific failure (database, connection)
    #[error("ledger backend error: {0}")]
    Backend(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::RecordNotFound {
            session_id: "s-1".into(),
            seq: 7,
        };
        assert!(err.to_string().contains("record 7"));
        assert!(err.to_string().contains("s-1"));

        let err = StorageError::InvariantViolation {
            reason: "executed without confirmation".into(),
        };
        assert!(err.to_string().contains("invariant"));
    }
}
