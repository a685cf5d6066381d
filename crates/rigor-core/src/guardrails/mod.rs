//! Guardrails: the three pure checkers that run before any code executes.
//!
//! - [`scanner`]: code text against an ordered rule table
//! - [`validator`]: dataset column summaries for statistical anomalies
//! - [`bounds`]: named measurements against configured ranges
//!
//! [`Guardrails`] runs all three and keeps their verdicts separate so the
//! ledger can record which checker said what.

pub mod bounds;
pub mod scanner;
pub mod validator;

pub use bounds::{check_bounds, BoundsConfig, Range};
pub use scanner::{default_rules, CodeScanner, RigorLevel, RuleSpec, ScanRule, ScanRuleError};
pub use validator::{validate_dataset, ColumnSummary, DatasetSnapshot, ValidatorConfig};

use rigor_ledger::RecordVerdicts;

/// Scanner plus validator thresholds.
#[derive(Debug, Clone)]
pub struct Guardrails {
    pub scanner: CodeScanner,
    pub validator: ValidatorConfig,
}

impl Guardrails {
    pub fn new(scanner: CodeScanner, validator: ValidatorConfig) -> Self {
        Self { scanner, validator }
    }

    /// Built-in rules, standard rigor, default thresholds.
    pub fn standard() -> Result<Self, ScanRuleError> {
        Ok(Self::new(CodeScanner::new()?, ValidatorConfig::default()))
    }

    /// Run every checker. Pure and deterministic.
    pub fn check(
        &self,
        code: &str,
        snapshot: &DatasetSnapshot,
        bounds: &BoundsConfig,
    ) -> RecordVerdicts {
        RecordVerdicts {
            scan: self.scanner.scan(code),
            data: validate_dataset(snapshot, &self.validator),
            bounds: check_bounds(&snapshot.measurements, bounds),
        }
    }
}
