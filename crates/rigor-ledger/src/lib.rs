//! rigor-ledger: append-only session ledger
//!
//! Persistence layer for the Rigor Gate pipeline. Every execution attempt of
//! a session, blocked or executed, becomes one sealed [`ExecutionRecord`].
//!
//! ## Key Components
//!
//! - [`SessionLedger`]: backend-agnostic async trait (append, list, get)
//! - [`FsSessionLedger`]: one fsynced JSONL file per session, appends under a
//!   host-wide file lock
//! - [`SurrealSessionLedger`]: SurrealDB table, `mem://` or `surrealkv://`
//! - [`fakes`]: in-memory ledgers for tests
//!
//! Records are hash-chained per session; [`verify_chain`] detects tampering
//! and sequence gaps.

mod error;
pub mod fakes;
mod file_lock;
pub mod fs_ledger;
pub mod keyed_lock;
mod migrations;
pub mod records;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::StorageError;
pub use fs_ledger::FsSessionLedger;
pub use keyed_lock::KeyedLocks;
pub use records::{
    verify_chain, ArtifactRef, CapturedOutput, ConfirmationStatus, ContentDigest,
    ExecutionRecord, FailureKind, Finding, FindingSource, Fingerprint, NewExecutionRecord,
    Outcome, RecordVerdicts, SessionId, Severity, Span, Verdict,
};
pub use storage_traits::{SessionLedger, StorageResult};
pub use surreal_ledger::SurrealSessionLedger;
