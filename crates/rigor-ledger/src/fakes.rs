//! In-memory fakes for the storage traits.
//!
//! `MemorySessionLedger` satisfies the full `SessionLedger` contract without
//! touching disk. `FailingLedger` wraps it and rejects appends on demand so
//! callers can exercise their write-failure paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::{ExecutionRecord, NewExecutionRecord, SessionId};
use crate::storage_traits::{SessionLedger, StorageResult};

// ---------------------------------------------------------------------------
// MemorySessionLedger
// ---------------------------------------------------------------------------

/// In-memory ledger backed by a `BTreeMap<SessionId, Vec<ExecutionRecord>>`.
#[derive(Debug, Default)]
pub struct MemorySessionLedger {
    sessions: Mutex<BTreeMap<SessionId, Vec<ExecutionRecord>>>,
}

impl MemorySessionLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionLedger for MemorySessionLedger {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewExecutionRecord,
    ) -> StorageResult<ExecutionRecord> {
        record.validate()?;
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let records = sessions.entry(session_id.clone()).or_default();
        let seq = records.len() as u64 + 1;
        let prev = records.last().map(|r| r.record_digest.clone());
        let sealed = ExecutionRecord::seal(session_id.clone(), seq, record, prev)?;
        records.push(sealed.clone());
        Ok(sealed)
    }

    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<ExecutionRecord>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn sessions(&self) -> StorageResult<Vec<SessionId>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FailingLedger
// ---------------------------------------------------------------------------

/// Ledger whose appends fail while `failing` is set. Reads pass through.
#[derive(Debug, Default)]
pub struct FailingLedger {
    inner: MemorySessionLedger,
    failing: AtomicBool,
    rejected: AtomicUsize,
}

impl FailingLedger {
    /// A ledger that rejects every append until [`FailingLedger::set_failing`]
    /// turns it off.
    pub fn new() -> Self {
        Self {
            inner: MemorySessionLedger::new(),
            failing: AtomicBool::new(true),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of appends rejected so far.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLedger for FailingLedger {
    async fn append(
        &self,
        session_id: &SessionId,
        record: NewExecutionRecord,
    ) -> StorageResult<ExecutionRecord> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.append(session_id, record).await
    }

    async fn list(&self, session_id: &SessionId) -> StorageResult<Vec<ExecutionRecord>> {
        self.inner.list(session_id).await
    }

    async fn sessions(&self) -> StorageResult<Vec<SessionId>> {
        self.inner.sessions().await
    }
}
