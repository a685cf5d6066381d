//! Storage trait definitions for the session ledger
//!
//! `SessionLedger` is the only persistence seam the pipeline depends on.
//! Backends live in `fs_ledger`, `surreal_ledger` and `fakes`; the contract
//! they share is exercised by `tests/trait_contracts.rs`.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::{ExecutionRecord, NewExecutionRecord, SessionId};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Append-only, per-session store of execution attempts.
///
/// Guarantees:
/// - `append` validates the record invariants before writing anything.
/// - Sequence numbers are assigned by the ledger: 1-based, gapless and
///   strictly increasing per session, even under concurrent appends.
/// - Records are immutable once appended; there is no update or delete.
/// - `list` returns records in sequence order and is idempotent.
#[async_trait]
pub trait SessionLedger: Send + Sync {
    /// Number, seal and persist a record. Returns the stored record.
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewExecutionRecord,
    ) -> StorageResult<ExecutionRecord>;

    /// All records of a session in sequence order. Unknown sessions are empty.
    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<ExecutionRecord>>;

    /// One record by sequence number.
    async fn get(&self, session_id: &SessionId, seq: u64) -> StorageResult<ExecutionRecord> {
        self.list(session_id)
            .await?
            .into_iter()
            .find(|r| r.seq == seq)
            .ok_or_else(|| StorageError::RecordNotFound {
                session_id: session_id.to_string(),
                seq,
            })
    }

    /// Session ids that have at least one record, sorted.
    async fn sessions(&self) -> StorageResult<Vec<SessionId>>;
}
