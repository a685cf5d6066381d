//! Sandbox configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};

/// Configuration for the subprocess sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum wall-clock time for one execution (milliseconds).
    pub timeout_ms: u64,
    /// Interpreter command; the script path is appended as the last argument.
    pub interpreter: Vec<String>,
    /// Extension of archived and executed scripts, without the dot.
    pub script_extension: String,
    /// Cap on captured stdout and on captured stderr, each.
    pub max_output_bytes: usize,
    /// Host environment variables passed through to the child.
    pub env_passthrough: Vec<String>,
    /// Variables set in the child on top of the passthrough list.
    pub extra_env: BTreeMap<String, String>,
    /// Prepend the sanity-check helpers to Python scripts.
    pub inject_sanity_checks: bool,
    /// How long to wait for output pipes to close after the child is killed.
    pub drain_grace_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            interpreter: vec!["python3".into()],
            script_extension: "py".into(),
            max_output_bytes: 1024 * 1024,
            env_passthrough: vec![
                "PATH".into(),
                "LANG".into(),
                "LC_ALL".into(),
                "PYTHONPATH".into(),
            ],
            extra_env: BTreeMap::from([("MPLBACKEND".to_string(), "Agg".to_string())]),
            inject_sanity_checks: false,
            drain_grace_ms: 500,
        }
    }
}

impl SandboxConfig {
    /// Shell interpreter, used by tests and shell-dialect deployments.
    pub fn shell() -> Self {
        Self {
            interpreter: vec!["sh".into()],
            script_extension: "sh".into(),
            extra_env: BTreeMap::new(),
            ..Self::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn validate(&self) -> SandboxResult<()> {
        if self.interpreter.first().map_or(true, |exe| exe.trim().is_empty()) {
            return Err(SandboxError::InvalidConfig("interpreter is empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidConfig(
                "timeout_ms must be greater than zero".into(),
            ));
        }
        if self.script_extension.is_empty()
            || !self
                .script_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(SandboxError::InvalidConfig(format!(
                "script_extension {:?} must be non-empty ascii alphanumerics",
                self.script_extension
            )));
        }
        Ok(())
    }

    pub fn is_python(&self) -> bool {
        self.script_extension == "py"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(cfg.interpreter, vec!["python3".to_string()]);
        assert_eq!(cfg.extra_env.get("MPLBACKEND").map(String::as_str), Some("Agg"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_sandbox_config_rejects_bad_values() {
        let mut cfg = SandboxConfig::shell();
        cfg.interpreter.clear();
        assert!(cfg.validate().is_err());

        let cfg = SandboxConfig::shell().with_timeout_ms(0);
        assert!(cfg.validate().is_err());

        let mut cfg = SandboxConfig::shell();
        cfg.script_extension = "../sh".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_sandbox_config_partial_toml() {
        let cfg: SandboxConfig = toml::from_str("timeout_ms = 500\n").unwrap();
        assert_eq!(cfg.timeout_ms, 500);
        assert_eq!(cfg.script_extension, "py");
    }
}
