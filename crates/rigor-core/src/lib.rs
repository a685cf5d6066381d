//! Rigor Gate core library
//!
//! Guardrailed execution for analyst code: checkers, confirmation gate,
//! sandboxed executor, session lifecycle and the reproducible-script curator.
//! [`RigorPipeline`] is the entry point; the ledger lives in `rigor-ledger`.

pub mod config;
pub mod curator;
pub mod error;
pub mod gate;
pub mod guardrails;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod providers;
pub mod sandbox;
pub mod session;
pub mod telemetry;

pub use config::{ConfigError, LedgerBackend, RigorConfig};
pub use curator::{curate, CuratedScript, CuratorConfig, ScriptDialect};
pub use error::{PipelineError, Result};
pub use gate::{evaluate, BlockReason, GateError, GateEvaluation, GateState};
pub use guardrails::{
    check_bounds, validate_dataset, BoundsConfig, CodeScanner, ColumnSummary, DatasetSnapshot,
    Guardrails, RigorLevel, RuleSpec, ScanRuleError, ValidatorConfig,
};
pub use pipeline::{RigorPipeline, RunResult, SubmitRequest, SubmitResponse, SubmitStatus};
pub use providers::{
    BoundsProvider, DatasetProvider, FsWorkdirAllocator, StaticInputs, WorkdirAllocator,
};
pub use sandbox::{
    CancelHandle, CodeExecutor, ExecutionRequest, ExecutionResult, ProcessSandbox,
    SandboxConfig, SandboxError,
};
pub use session::{Session, SessionRegistry, SessionState};

pub use rigor_ledger::{
    ConfirmationStatus, ExecutionRecord, FailureKind, Finding, FindingSource, Outcome, SessionId,
    SessionLedger, Severity, Verdict,
};
