//! Code scanner: an ordered, data-driven table of pattern rules.
//!
//! Scanning is pure. Code is matched as text and never executed. Each rule
//! reports at most its first match, and findings come out in rule-table order.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use rigor_ledger::{Finding, FindingSource, Severity, Span, Verdict};

/// Errors raised while building a rule table.
#[derive(Debug, thiserror::Error)]
pub enum ScanRuleError {
    #[error("rule {rule_id}: invalid pattern: {reason}")]
    InvalidPattern { rule_id: String, reason: String },

    #[error("rule {rule_id}: INFO is not a valid rule severity")]
    InfoSeverity { rule_id: String },

    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),
}

/// How strictly scanner WARNING rules are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigorLevel {
    /// Scanner WARNING rules are escalated to CRITICAL.
    Strict,
    /// The rule table as written.
    #[default]
    Standard,
    /// Scanner WARNING rules are reported as INFO.
    Relaxed,
}

impl RigorLevel {
    /// Effective severity of a rule under this level. CRITICAL is never lowered.
    pub fn apply(&self, severity: Severity) -> Severity {
        match (self, severity) {
            (_, Severity::Critical) => Severity::Critical,
            (RigorLevel::Strict, Severity::Warning) => Severity::Critical,
            (RigorLevel::Relaxed, Severity::Warning) => Severity::Info,
            (_, s) => s,
        }
    }
}

impl std::str::FromStr for RigorLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(RigorLevel::Strict),
            "standard" => Ok(RigorLevel::Standard),
            "relaxed" => Ok(RigorLevel::Relaxed),
            other => Err(format!(
                "unknown rigor level {other:?} (expected strict, standard or relaxed)"
            )),
        }
    }
}

impl std::fmt::Display for RigorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RigorLevel::Strict => write!(f, "strict"),
            RigorLevel::Standard => write!(f, "standard"),
            RigorLevel::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// Serializable rule definition, as written in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub severity: Severity,
    pub pattern: String,
    pub message: String,
}

impl RuleSpec {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct ScanRule {
    spec: RuleSpec,
    matcher: Regex,
}

impl ScanRule {
    pub fn compile(spec: RuleSpec) -> Result<Self, ScanRuleError> {
        if spec.severity == Severity::Info {
            return Err(ScanRuleError::InfoSeverity { rule_id: spec.id });
        }
        let matcher = RegexBuilder::new(&spec.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ScanRuleError::InvalidPattern {
                rule_id: spec.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { spec, matcher })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn severity(&self) -> Severity {
        self.spec.severity
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }
}

/// The built-in rule table.
pub fn default_rules() -> Vec<RuleSpec> {
    use Severity::{Critical, Warning};
    vec![
        RuleSpec::new(
            "synthetic.random-generation",
            Critical,
            r"np\.random\.(rand|randn|random|uniform|normal|choice)\s*\(|\brandom\.(random|uniform|gauss|choice)\s*\(",
            "Random/synthetic data generation detected. Use real experimental data only.",
        ),
        RuleSpec::new(
            "synthetic.fake-data-reference",
            Critical,
            r"fake|dummy|synthetic|simulated",
            "Code references fake/synthetic data. Use real experimental data only.",
        ),
        RuleSpec::new(
            "manipulation.pvalue-conditional",
            Critical,
            r"if.*p.?value.*[<>].*0\.05.*:.*=",
            "Conditional result modification based on p-value detected.",
        ),
        RuleSpec::new(
            "manipulation.forced-result",
            Critical,
            r"result\s*=\s*(expected|hypothesis|target)",
            "Result forced to match expected/hypothesis value.",
        ),
        RuleSpec::new(
            "manipulation.suspicious-comment",
            Critical,
            r"#.*(hack|fudge|fake)",
            "Code contains suspicious comments suggesting data manipulation.",
        ),
        RuleSpec::new(
            "escape.shell",
            Critical,
            r"\bos\.(system|popen|exec[lv]p?e?|spawn[lv]p?e?)\s*\(|\bsubprocess\.(run|Popen|call|check_output|check_call)\s*\(",
            "Shell execution is not permitted inside the sandbox.",
        ),
        RuleSpec::new(
            "escape.dunder",
            Critical,
            r"__(?:class|bases|subclasses|globals|mro|builtins)__",
            "Dunder introspection detected. Object-graph walks are not permitted inside the sandbox.",
        ),
        RuleSpec::new(
            "escape.absolute-write",
            Critical,
            concat!(
                r#"\bopen\s*\(\s*[rbf]{0,2}["']/[^"'\n]*["']\s*,\s*(?:mode\s*=\s*)?[rbf]{0,2}["'][rbt+]*[wax]"#,
                r#"|\.(?:to_csv|to_parquet|to_json|to_excel|to_pickle|to_hdf|savefig|savetxt|savez|save|write_text|write_bytes)\s*\(\s*[rbf]{0,2}["']/"#,
                r#"|\bPath\s*\(\s*[rbf]{0,2}["']/[^"'\n]*["']\s*\)\s*\.\s*(?:write_text|write_bytes|touch|mkdir)\b"#,
                r#"|>>?\s*["']?/(?:[^d"'\s]|d[^e]|de[^v]|dev[^/])"#,
                r#"|\btee\s+(?:-a\s+)?["']?/"#,
            ),
            "Write to an absolute path. Results must be written under OUTPUT_DIR using relative paths.",
        ),
        RuleSpec::new(
            "reproducibility.random-seed",
            Warning,
            r"np\.random\.seed",
            "Random seed set. Ensure this is for reproducibility, not cherry-picking.",
        ),
        RuleSpec::new(
            "exclusion.outlier-removal",
            Warning,
            r"outlier.*remove|remove.*outlier",
            "Outlier removal detected. Document criteria and report how many were removed.",
        ),
        RuleSpec::new(
            "exclusion.data-exclusion",
            Warning,
            r"exclude|skip|ignore",
            "Data exclusion detected. Document criteria and report what was excluded.",
        ),
        RuleSpec::new(
            "escape.dynamic-eval",
            Warning,
            r"(?:^|[^.\w])(eval|exec|compile|__import__)\s*\(",
            "Dynamic code evaluation detected. Review what is being evaluated.",
        ),
        RuleSpec::new(
            "io.open",
            Warning,
            r"(?:^|[^.\w]|\bio\.)open\s*\(",
            "Direct file access via open(). Check which files are read or written.",
        ),
    ]
}

/// Ordered rule table plus the rigor level it is applied at.
#[derive(Debug, Clone)]
pub struct CodeScanner {
    rules: Vec<ScanRule>,
    level: RigorLevel,
}

impl CodeScanner {
    /// Scanner with the built-in rules at the standard level.
    pub fn new() -> Result<Self, ScanRuleError> {
        Self::with_rules(default_rules())
    }

    /// Scanner with exactly the given rules, in order.
    pub fn with_rules(specs: Vec<RuleSpec>) -> Result<Self, ScanRuleError> {
        let mut scanner = Self {
            rules: Vec::with_capacity(specs.len()),
            level: RigorLevel::Standard,
        };
        scanner.extend(specs)?;
        Ok(scanner)
    }

    pub fn with_level(mut self, level: RigorLevel) -> Self {
        self.level = level;
        self
    }

    pub fn level(&self) -> RigorLevel {
        self.level
    }

    /// Append a rule after the existing ones.
    pub fn add_rule(&mut self, spec: RuleSpec) -> Result<(), ScanRuleError> {
        if self.rules.iter().any(|r| r.id() == spec.id) {
            return Err(ScanRuleError::DuplicateRule(spec.id));
        }
        self.rules.push(ScanRule::compile(spec)?);
        Ok(())
    }

    /// Append several rules. Nothing is added if any of them is invalid.
    pub fn extend(&mut self, specs: Vec<RuleSpec>) -> Result<(), ScanRuleError> {
        let mut staged = self.clone();
        for spec in specs {
            staged.add_rule(spec)?;
        }
        *self = staged;
        Ok(())
    }

    pub fn rules(&self) -> impl Iterator<Item = &ScanRule> {
        self.rules.iter()
    }

    /// Scan code and return findings in rule-table order.
    pub fn scan(&self, code: &str) -> Verdict {
        let findings = self
            .rules
            .iter()
            .filter_map(|rule| {
                let m = rule.matcher.find(code)?;
                let severity = self.level.apply(rule.severity());
                Some(
                    Finding::new(
                        FindingSource::Scanner,
                        severity,
                        rule.id(),
                        rule.spec.message.clone(),
                    )
                    .with_subject(m.as_str())
                    .with_span(Span {
                        start: m.start(),
                        end: m.end(),
                        text: m.as_str().to_string(),
                    }),
                )
            })
            .collect();
        Verdict::from_findings(findings)
    }
}
