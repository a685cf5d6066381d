//! Ledger record schema.
//!
//! Everything the pipeline persists about an execution attempt lives here:
//! the merged [`Verdict`] from the checkers, the confirmation status, the
//! outcome and the captured output. Records are sealed into a per-session
//! SHA-256 hash chain when the ledger appends them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StorageError;
use crate::StorageResult;

// ---------------------------------------------------------------------------
// Identifiers and digests
// ---------------------------------------------------------------------------

/// Unique identifier for an analysis session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random SessionId
    pub fn new() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Findings and verdicts
// ---------------------------------------------------------------------------

/// Severity tier of a finding.
///
/// Ordered so that `Critical > Warning > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Logged only, never blocks.
    Info,
    /// Blocks until a human confirms.
    Warning,
    /// Always blocks; confirmation cannot override it.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which checker produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    Scanner,
    Data,
    Bounds,
}

impl std::fmt::Display for FindingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingSource::Scanner => write!(f, "scanner"),
            FindingSource::Data => write!(f, "data"),
            FindingSource::Bounds => write!(f, "bounds"),
        }
    }
}

/// Byte span of a scanner match within the submitted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Identity of a finding across re-scans: rule id plus subject.
///
/// Two findings with the same fingerprint are "the same warning" even if
/// their messages differ in the numbers they quote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    pub rule_id: String,
    pub subject: Option<String>,
}

/// A single severity-tagged finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub rule_id: String,
    pub message: String,
    pub source: FindingSource,
    /// Matched text, column name or parameter name the finding is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Finding {
    pub fn new(
        source: FindingSource,
        severity: Severity,
        rule_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            rule_id: rule_id.into(),
            message: message.into(),
            source,
            subject: None,
            span: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            rule_id: self.rule_id.clone(),
            subject: self.subject.clone(),
        }
    }
}

/// Ordered list of findings. Order is significant and preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub findings: Vec<Finding>,
}

impl Verdict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_findings(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Concatenate verdicts, keeping each part's order.
    pub fn merged<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Verdict>,
    {
        Self {
            findings: parts.into_iter().flat_map(|v| v.findings).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }

    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    pub fn has_warnings(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Warning)
    }

    /// No WARNING or CRITICAL entries (INFO only, or nothing).
    pub fn is_clean(&self) -> bool {
        !self.has_critical() && !self.has_warnings()
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Fingerprints of all WARNING entries.
    pub fn warning_fingerprints(&self) -> BTreeSet<Fingerprint> {
        self.with_severity(Severity::Warning)
            .map(Finding::fingerprint)
            .collect()
    }
}

/// The three checker verdicts of one submission, kept separate in the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVerdicts {
    pub scan: Verdict,
    pub data: Verdict,
    pub bounds: Verdict,
}

impl RecordVerdicts {
    /// Scanner, then data, then bounds findings.
    pub fn merged(&self) -> Verdict {
        Verdict::merged([self.scan.clone(), self.data.clone(), self.bounds.clone()])
    }
}

// ---------------------------------------------------------------------------
// Confirmation, outcome, failure
// ---------------------------------------------------------------------------

/// Whether a human confirmation was needed and given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationStatus {
    NotRequired,
    RequiredPending,
    Confirmed,
}

impl ConfirmationStatus {
    /// Whether execution is permitted under this status.
    pub fn permits_execution(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Confirmed)
    }
}

/// Final outcome of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Blocked,
    ExecutedSuccess,
    ExecutedFailure,
}

impl Outcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::ExecutedSuccess | Self::ExecutedFailure)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Blocked => write!(f, "blocked"),
            Outcome::ExecutedSuccess => write!(f, "executed-success"),
            Outcome::ExecutedFailure => write!(f, "executed-failure"),
        }
    }
}

/// Why an executed attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Wall-clock limit exceeded; the subprocess was killed.
    ExecutionTimeout { limit_ms: u64 },
    /// The code itself failed (non-zero exit or signal).
    ExecutionFault {
        exit_code: Option<i32>,
        message: String,
    },
    /// A caller asked for the running subprocess to be terminated.
    Cancelled,
    /// The sandbox could not be started at all.
    SandboxUnavailable { reason: String },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ExecutionTimeout { limit_ms } => {
                write!(f, "ExecutionTimeout: exceeded {limit_ms}ms")
            }
            FailureKind::ExecutionFault { exit_code, message } => match exit_code {
                Some(code) => write!(f, "ExecutionFault: exit code {code}: {message}"),
                None => write!(f, "ExecutionFault: {message}"),
            },
            FailureKind::Cancelled => write!(f, "Cancelled: terminated on request"),
            FailureKind::SandboxUnavailable { reason } => {
                write!(f, "SandboxUnavailable: {reason}")
            }
        }
    }
}

/// A file produced by a successful run, relative to the session output dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the run directory (e.g. `fig1.png`).
    pub name: String,
    /// Path relative to the session output directory.
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Captured process output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Set when stdout or stderr exceeded the capture cap.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An execution attempt before the ledger has numbered and sealed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecutionRecord {
    /// Correlation id handed back to the caller.
    pub attempt_id: Uuid,
    pub code: String,
    pub code_digest: ContentDigest,
    /// The raw `confirmed` flag as submitted.
    pub confirmed_flag: bool,
    /// Sequence number of the blocked record this confirmation answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_seq: Option<u64>,
    pub verdicts: RecordVerdicts,
    pub confirmation: ConfirmationStatus,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CapturedOutput>,
    /// Declared input files the step reads.
    #[serde(default)]
    pub inputs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl NewExecutionRecord {
    /// Check the record invariants before it is appended.
    ///
    /// - `executed-*` requires `not-required` or `confirmed`
    /// - `executed-failure` carries a failure kind, the others do not
    /// - blocked records carry no captured output
    pub fn validate(&self) -> StorageResult<()> {
        if self.outcome.is_executed() && !self.confirmation.permits_execution() {
            return Err(StorageError::InvariantViolation {
                reason: format!(
                    "outcome {} with confirmation {:?}",
                    self.outcome, self.confirmation
                ),
            });
        }
        match (self.outcome, &self.failure) {
            (Outcome::ExecutedFailure, None) => {
                return Err(StorageError::InvariantViolation {
                    reason: "executed-failure without a failure kind".into(),
                })
            }
            (Outcome::ExecutedSuccess | Outcome::Blocked, Some(kind)) => {
                return Err(StorageError::InvariantViolation {
                    reason: format!("{} record carries failure {kind}", self.outcome),
                })
            }
            _ => {}
        }
        if self.outcome == Outcome::Blocked && self.output.is_some() {
            return Err(StorageError::InvariantViolation {
                reason: "blocked record carries captured output".into(),
            });
        }
        if self.ended_at < self.started_at {
            return Err(StorageError::InvariantViolation {
                reason: "ended_at precedes started_at".into(),
            });
        }
        Ok(())
    }
}

/// A numbered, sealed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub session_id: SessionId,
    /// 1-based, gapless within the session.
    pub seq: u64,
    pub attempt_id: Uuid,
    pub code: String,
    pub code_digest: ContentDigest,
    pub confirmed_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_seq: Option<u64>,
    pub verdicts: RecordVerdicts,
    pub confirmation: ConfirmationStatus,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CapturedOutput>,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Digest of the previous record in the session, `None` for seq 1.
    pub prev_digest: Option<String>,
    pub record_digest: String,
}

impl ExecutionRecord {
    /// Number and seal a new record onto the end of a session chain.
    pub fn seal(
        session_id: SessionId,
        seq: u64,
        new: NewExecutionRecord,
        prev_digest: Option<String>,
    ) -> StorageResult<Self> {
        let mut record = Self {
            session_id,
            seq,
            attempt_id: new.attempt_id,
            code: new.code,
            code_digest: new.code_digest,
            confirmed_flag: new.confirmed_flag,
            prior_seq: new.prior_seq,
            verdicts: new.verdicts,
            confirmation: new.confirmation,
            outcome: new.outcome,
            failure: new.failure,
            output: new.output,
            inputs: new.inputs,
            started_at: new.started_at,
            ended_at: new.ended_at,
            prev_digest,
            record_digest: String::new(),
        };
        record.record_digest = record.compute_digest()?;
        Ok(record)
    }

    /// SHA-256 over the previous digest and the record body (digest field blank).
    pub fn compute_digest(&self) -> StorageResult<String> {
        let mut body = self.clone();
        body.record_digest = String::new();
        let bytes = serde_json::to_vec(&body)?;
        let mut hasher = Sha256::new();
        hasher.update(self.prev_digest.as_deref().unwrap_or("").as_bytes());
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Merged verdict: scanner, data, bounds.
    pub fn verdict(&self) -> Verdict {
        self.verdicts.merged()
    }

    pub fn artifacts(&self) -> &[ArtifactRef] {
        self.output
            .as_ref()
            .map(|o| o.artifacts.as_slice())
            .unwrap_or(&[])
    }
}

/// Verify numbering and hash chain of one session's records, in list order.
pub fn verify_chain(records: &[ExecutionRecord]) -> StorageResult<()> {
    let mut prev: Option<&ExecutionRecord> = None;
    for (idx, record) in records.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        let broken = |reason: String| StorageError::ChainBroken {
            session_id: record.session_id.to_string(),
            seq: record.seq,
            reason,
        };
        if record.seq != expected_seq {
            return Err(broken(format!("expected seq {expected_seq}")));
        }
        if let Some(p) = prev {
            if p.session_id != record.session_id {
                return Err(broken("mixed sessions".into()));
            }
        }
        let expected_prev = prev.map(|p| p.record_digest.clone());
        if record.prev_digest != expected_prev {
            return Err(broken("prev_digest does not match predecessor".into()));
        }
        if record.compute_digest()? != record.record_digest {
            return Err(broken("record digest mismatch".into()));
        }
        prev = Some(record);
    }
    Ok(())
}
