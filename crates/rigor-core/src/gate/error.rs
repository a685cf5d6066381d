//! Error types for the rigor gate.

use super::state::GateState;

/// Errors produced by the gate state machine.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("illegal gate transition {from} -> {to}")]
    IllegalTransition { from: GateState, to: GateState },

    #[error("confirmation refers to record {seq}, which does not exist")]
    PriorNotFound { seq: u64 },

    #[error("confirmation refers to record {seq}, which is not awaiting confirmation")]
    PriorNotPending { seq: u64 },

    #[error("confirmation refers to record {seq}, which holds different code")]
    PriorCodeMismatch { seq: u64 },
}

/// Result type for gate operations.
pub type GateResult<T> = std::result::Result<T, GateError>;
