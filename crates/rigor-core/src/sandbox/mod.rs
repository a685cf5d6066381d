//! Sandbox: runs accepted code in an interpreter subprocess.
//!
//! The child gets a fresh staging directory as its working directory and
//! home, a scrubbed environment, no stdin, its own process group and a
//! wall-clock limit. Output is captured up to a cap; files it writes become
//! artifacts only if it exits successfully. Writes to absolute paths are
//! refused earlier, by the scanner's `escape.absolute-write` rule.
//!
//! # Modules
//!
//! - [`config`]   — `SandboxConfig`
//! - [`executor`] — `CodeExecutor` trait, `ProcessSandbox`
//! - [`cancel`]   — `CancelHandle`
//! - `group`      — process-group ownership of the child
//! - [`prelude`]  — optional sanity-check helpers for Python
//! - [`error`]    — `SandboxError` / `SandboxResult`

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
mod group;
pub mod prelude;

pub use cancel::CancelHandle;
pub use config::SandboxConfig;
pub use error::{SandboxError, SandboxResult};
pub use executor::{
    CodeExecutor, ExecutionRequest, ExecutionResult, ProcessSandbox, RUNS_DIR, SCRIPTS_DIR,
    STAGING_DIR,
};
