//! `RigorConfig`: TOML file plus environment overrides.
//!
//! ```toml
//! [gate]
//! level = "strict"
//!
//! [[scanner.rules]]
//! id = "domain.hardcoded-gain"
//! severity = "WARNING"
//! pattern = "gain\\s*=\\s*[0-9.]+"
//! message = "Hardcoded amplifier gain"
//!
//! [bounds]
//! temperature = { min = 0.0, max = 1000.0 }
//!
//! [sandbox]
//! timeout_ms = 60000
//!
//! [ledger]
//! backend = "fs"
//! root = "/var/lib/rigor"
//!
//! [curator]
//! dialect = "python"
//! ```
//!
//! Every section is optional. `RIGOR_HOME`, `RIGOR_TIMEOUT_MS` and
//! `RIGOR_LEVEL` override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::curator::CuratorConfig;
use crate::guardrails::{
    BoundsConfig, CodeScanner, Guardrails, RigorLevel, RuleSpec, ScanRuleError, ValidatorConfig,
};
use crate::sandbox::{SandboxConfig, SandboxError};

pub const ENV_HOME: &str = "RIGOR_HOME";
pub const ENV_TIMEOUT_MS: &str = "RIGOR_TIMEOUT_MS";
pub const ENV_LEVEL: &str = "RIGOR_LEVEL";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_ROOT: &str = ".rigor";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Rule(#[from] ScanRuleError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    pub level: RigorLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    /// Domain rules, appended after the built-in table.
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// JSONL file per session under the data root.
    #[default]
    Fs,
    /// SurrealDB; `surrealkv://<root>/ledger.db` unless `url` is set.
    Surreal,
    /// Nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub backend: LedgerBackend,
    /// Data root: session metadata, ledgers and output directories.
    pub root: PathBuf,
    pub url: Option<String>,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Fs,
            root: PathBuf::from(DEFAULT_ROOT),
            url: None,
        }
    }
}

impl LedgerSection {
    pub fn surreal_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| {
            format!("surrealkv://{}", self.root.join("ledger.db").display())
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigorConfig {
    pub gate: GateSection,
    pub scanner: ScannerSection,
    pub validator: ValidatorConfig,
    pub bounds: BoundsConfig,
    pub sandbox: SandboxConfig,
    pub ledger: LedgerSection,
    pub curator: CuratorConfig,
}

impl RigorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Without one, `<RIGOR_HOME>/config.toml`
    /// (or `./.rigor/config.toml`) is read if present. Environment overrides
    /// are applied last and the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let home = std::env::var_os(ENV_HOME)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
                let candidate = home.join(CONFIG_FILE);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RIGOR_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(ENV_HOME).filter(|v| !v.trim().is_empty()) {
            self.ledger.root = PathBuf::from(home);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.sandbox.timeout_ms = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: ENV_TIMEOUT_MS.into(),
                reason: format!("{raw:?}: {e}"),
            })?;
        }
        if let Some(raw) = lookup(ENV_LEVEL) {
            self.gate.level = raw.parse().map_err(|reason| ConfigError::Invalid {
                key: ENV_LEVEL.into(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Check everything that can be checked without touching the disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sandbox.validate()?;
        self.scanner()?;
        for (name, range) in self.bounds.iter() {
            if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                return Err(ConfigError::Invalid {
                    key: format!("bounds.{name}"),
                    reason: format!("min {} is greater than max {}", range.min, range.max),
                });
            }
        }
        Ok(())
    }

    /// Built-in rules plus configured ones, at the configured level.
    pub fn scanner(&self) -> Result<CodeScanner, ConfigError> {
        let mut scanner = CodeScanner::new()?.with_level(self.gate.level);
        scanner.extend(self.scanner.rules.clone())?;
        Ok(scanner)
    }

    pub fn guardrails(&self) -> Result<Guardrails, ConfigError> {
        Ok(Guardrails::new(self.scanner()?, self.validator.clone()))
    }

    pub fn data_root(&self) -> &Path {
        &self.ledger.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigor_ledger::Severity;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_file() {
        let cfg = RigorConfig::default();
        assert_eq!(cfg.gate.level, RigorLevel::Standard);
        assert_eq!(cfg.sandbox.timeout_ms, 30_000);
        assert_eq!(cfg.ledger.backend, LedgerBackend::Fs);
        assert_eq!(cfg.data_root(), Path::new(".rigor"));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_full_file() {
        let cfg = RigorConfig::from_toml_str(
            r#"
            [gate]
            level = "strict"

            [[scanner.rules]]
            id = "domain.hardcoded-gain"
            severity = "WARNING"
            pattern = 'gain\s*=\s*[0-9.]+'
            message = "Hardcoded amplifier gain"

            [validator]
            smoothness_threshold = 0.001

            [bounds]
            temperature = { min = 0.0, max = 1000.0 }

            [sandbox]
            timeout_ms = 5000
            interpreter = ["sh"]
            script_extension = "sh"

            [ledger]
            backend = "surreal"
            root = "/tmp/rigor-data"

            [curator]
            dialect = "shell"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.gate.level, RigorLevel::Strict);
        assert_eq!(cfg.scanner.rules[0].severity, Severity::Warning);
        assert_eq!(cfg.validator.smoothness_threshold, 0.001);
        assert_eq!(cfg.validator.min_smoothness_samples, 1000);
        assert!(cfg.bounds.get("temperature").is_some());
        assert_eq!(cfg.sandbox.timeout_ms, 5000);
        assert_eq!(cfg.ledger.backend, LedgerBackend::Surreal);
        assert_eq!(
            cfg.ledger.surreal_url(),
            "surrealkv:///tmp/rigor-data/ledger.db"
        );
        assert_eq!(cfg.curator.dialect, crate::curator::ScriptDialect::Shell);

        // Strict level escalates the configured warning rule.
        let scanner = cfg.scanner().unwrap();
        let verdict = scanner.scan("gain = 20.5");
        assert!(verdict.has_critical());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_HOME, "/srv/rigor"),
            (ENV_TIMEOUT_MS, "1500"),
            (ENV_LEVEL, "relaxed"),
        ]);
        let mut cfg = RigorConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.data_root(), Path::new("/srv/rigor"));
        assert_eq!(cfg.sandbox.timeout_ms, 1500);
        assert_eq!(cfg.gate.level, RigorLevel::Relaxed);
    }

    #[test]
    fn test_bad_overrides_are_rejected() {
        let mut cfg = RigorConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == ENV_LEVEL).then(|| "bypass".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == ENV_LEVEL));

        let err = cfg
            .apply_overrides(|k| (k == ENV_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_rule_and_bounds() {
        let mut cfg = RigorConfig::default();
        cfg.scanner
            .rules
            .push(RuleSpec::new("bad", Severity::Warning, "(unclosed", "x"));
        assert!(matches!(cfg.validate(), Err(ConfigError::Rule(_))));

        let mut cfg = RigorConfig::default();
        cfg.bounds.add("temperature", 10.0, 1.0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));

        let mut cfg = RigorConfig::default();
        cfg.sandbox.timeout_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Sandbox(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = RigorConfig::load(Some(Path::new("/nonexistent/rigor.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
