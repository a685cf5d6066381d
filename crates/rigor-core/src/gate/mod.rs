//! Rigor gate: composes the guardrail verdicts and runs the confirmation
//! state machine.
//!
//! # Modules
//!
//! - [`state`]  — `GateState`, `GateMachine` (checked transitions, audit trail)
//! - [`engine`] — `evaluate()`, `find_prior()`
//! - [`error`]  — `GateError` / `GateResult`

pub mod engine;
pub mod error;
pub mod state;

pub use engine::{evaluate, find_prior, BlockReason, GateEvaluation, PriorVerdict};
pub use error::{GateError, GateResult};
pub use state::{GateMachine, GateState};
