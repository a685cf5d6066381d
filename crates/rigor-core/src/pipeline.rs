//! `RigorPipeline`: the operations the orchestration layer calls.
//!
//! A submission runs guardrails, gate, executor and ledger append under the
//! session's lock. Every submission that gets past intake (session active,
//! not cancelled, inputs available, confirmation reference valid) ends in
//! exactly one ledger record, or in `LedgerWrite` if that record could not
//! be stored.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{warn, Instrument};
use uuid::Uuid;

use rigor_ledger::{
    verify_chain, CapturedOutput, ConfirmationStatus, ContentDigest, ExecutionRecord,
    FailureKind, Fingerprint, FsSessionLedger, NewExecutionRecord, Outcome, SessionId,
    SessionLedger, SurrealSessionLedger, Verdict,
};
use rigor_ledger::fakes::MemorySessionLedger;

use crate::config::{ConfigError, LedgerBackend, RigorConfig};
use crate::curator::{self, CuratedScript, CuratorConfig};
use crate::error::{PipelineError, Result};
use crate::gate::{self, BlockReason, GateState};
use crate::guardrails::Guardrails;
use crate::metrics::METRICS;
use crate::obs;
use crate::providers::{
    BoundsProvider, DatasetProvider, FsWorkdirAllocator, StaticInputs, WorkdirAllocator,
};
use crate::sandbox::{CancelHandle, CodeExecutor, ExecutionRequest, ProcessSandbox};
use crate::session::{Session, SessionRegistry};

/// One code submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub code: String,
    pub confirmed: bool,
    /// Blocked record this confirmation answers. Defaults to the latest
    /// pending record with the same code.
    pub prior_seq: Option<u64>,
    /// Input files the code reads, for the curated script's parameters.
    pub inputs: Vec<String>,
}

impl SubmitRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            confirmed: false,
            prior_seq: None,
            inputs: Vec::new(),
        }
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    pub fn prior_seq(mut self, seq: u64) -> Self {
        self.prior_seq = Some(seq);
        self
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }
}

/// Gate decision for one submission.
///
/// Serialized as `status: blocked|executed`; a blocked submission also
/// carries `reason: critical|needs_confirmation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The code ran; see `result` for how it went.
    Executed,
    /// Warnings need a human; resubmit with `confirmed`.
    NeedsConfirmation,
    /// CRITICAL findings. No confirmation helps.
    Blocked,
}

impl SubmitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitStatus::Executed => "executed",
            SubmitStatus::NeedsConfirmation | SubmitStatus::Blocked => "blocked",
        }
    }

    pub fn block_reason(&self) -> Option<&'static str> {
        match self {
            SubmitStatus::Executed => None,
            SubmitStatus::NeedsConfirmation => Some("needs_confirmation"),
            SubmitStatus::Blocked => Some("critical"),
        }
    }
}

impl Serialize for SubmitStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let reason = self.block_reason();
        let mut map = serializer.serialize_map(Some(1 + usize::from(reason.is_some())))?;
        map.serialize_entry("status", self.as_str())?;
        if let Some(reason) = reason {
            map.serialize_entry("reason", reason)?;
        }
        map.end()
    }
}

/// What the executor produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub outcome: Outcome,
    pub failure: Option<FailureKind>,
    pub output: CapturedOutput,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::ExecutedSuccess
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub status: SubmitStatus,
    /// Full verdict: scanner, data and bounds findings, unredacted.
    pub verdict: Verdict,
    pub result: Option<RunResult>,
    /// Ledger sequence number of the record this submission produced.
    pub seq: u64,
    pub correlation_id: Uuid,
    pub confirmed_flag: bool,
    pub confirmation: ConfirmationStatus,
    /// Warnings a confirmation did not cover.
    pub uncovered: Vec<Fingerprint>,
    pub gate_trail: Vec<GateState>,
}

impl SubmitResponse {
    pub fn executed(&self) -> bool {
        self.status == SubmitStatus::Executed
    }

    /// Human-facing text of the decision, findings included verbatim.
    pub fn review_message(&self) -> String {
        let mut out = String::new();
        let seq = self.seq;
        let _ = match self.status {
            SubmitStatus::Blocked => writeln!(
                out,
                "Submission blocked (record #{seq}): CRITICAL rigor violations. \
                 Confirmation cannot override them; the code has to change."
            ),
            SubmitStatus::NeedsConfirmation => writeln!(
                out,
                "Submission needs confirmation (record #{seq}). Review every warning below. \
                 To run it anyway, resubmit with confirmed=true (prior record #{seq})."
            ),
            SubmitStatus::Executed => match self.result.as_ref().and_then(|r| r.failure.as_ref())
            {
                None => writeln!(out, "Executed successfully (record #{seq})."),
                Some(failure) => writeln!(out, "Executed with failure (record #{seq}): {failure}"),
            },
        };

        for finding in self.verdict.iter() {
            let _ = write!(
                out,
                "  [{}] {}: {}",
                finding.severity, finding.rule_id, finding.message
            );
            if let Some(subject) = &finding.subject {
                let _ = write!(out, " ({subject})");
            }
            out.push('\n');
        }

        if self.status == SubmitStatus::NeedsConfirmation
            && self.confirmed_flag
            && !self.uncovered.is_empty()
        {
            let names: Vec<String> = self
                .uncovered
                .iter()
                .map(|fp| match &fp.subject {
                    Some(s) => format!("{} ({s})", fp.rule_id),
                    None => fp.rule_id.clone(),
                })
                .collect();
            let _ = writeln!(
                out,
                "Not covered by an earlier confirmation: {}",
                names.join(", ")
            );
        }
        out
    }
}

/// Guardrailed execution pipeline.
pub struct RigorPipeline {
    guardrails: Guardrails,
    ledger: Arc<dyn SessionLedger>,
    executor: Arc<dyn CodeExecutor>,
    workdirs: Arc<dyn WorkdirAllocator>,
    datasets: Arc<dyn DatasetProvider>,
    bounds: Arc<dyn BoundsProvider>,
    sessions: SessionRegistry,
    curator: CuratorConfig,
}

impl RigorPipeline {
    /// Pipeline with empty inputs and an in-memory session registry.
    pub fn new(
        guardrails: Guardrails,
        ledger: Arc<dyn SessionLedger>,
        executor: Arc<dyn CodeExecutor>,
        workdirs: Arc<dyn WorkdirAllocator>,
    ) -> Self {
        let inputs = Arc::new(StaticInputs::new());
        Self {
            guardrails,
            ledger,
            executor,
            workdirs,
            datasets: inputs.clone(),
            bounds: inputs,
            sessions: SessionRegistry::in_memory(),
            curator: CuratorConfig::default(),
        }
    }

    pub fn with_datasets(mut self, datasets: Arc<dyn DatasetProvider>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn with_bounds(mut self, bounds: Arc<dyn BoundsProvider>) -> Self {
        self.bounds = bounds;
        self
    }

    /// One object serving both dataset snapshots and bounds.
    pub fn with_inputs<T>(self, inputs: Arc<T>) -> Self
    where
        T: DatasetProvider + BoundsProvider + 'static,
    {
        self.with_datasets(inputs.clone()).with_bounds(inputs)
    }

    pub fn with_sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_curator(mut self, curator: CuratorConfig) -> Self {
        self.curator = curator;
        self
    }

    /// Wire everything from configuration: ledger backend, process sandbox,
    /// `<root>/sessions/<id>/output` directories and the configured bounds.
    pub async fn from_config(config: &RigorConfig) -> Result<Self> {
        config.validate()?;
        let root = config.data_root();
        std::fs::create_dir_all(root)?;

        let (ledger, sessions): (Arc<dyn SessionLedger>, SessionRegistry) =
            match config.ledger.backend {
                LedgerBackend::Fs => (
                    Arc::new(FsSessionLedger::new(root.join("sessions"))?),
                    SessionRegistry::load(root)?,
                ),
                LedgerBackend::Surreal => (
                    Arc::new(SurrealSessionLedger::connect(&config.ledger.surreal_url()).await?),
                    SessionRegistry::load(root)?,
                ),
                LedgerBackend::Memory => (
                    Arc::new(MemorySessionLedger::new()),
                    SessionRegistry::in_memory(),
                ),
            };
        let executor = ProcessSandbox::new(config.sandbox.clone()).map_err(ConfigError::from)?;
        let inputs = Arc::new(StaticInputs::new().with_default_bounds(config.bounds.clone()));

        Ok(Self::new(
            config.guardrails()?,
            ledger,
            Arc::new(executor),
            Arc::new(FsWorkdirAllocator::new(root)),
        )
        .with_inputs(inputs)
        .with_sessions(sessions)
        .with_curator(config.curator.clone()))
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    pub fn ledger(&self) -> &Arc<dyn SessionLedger> {
        &self.ledger
    }

    // -- sessions -----------------------------------------------------------

    pub async fn open_session(&self) -> Result<Session> {
        self.open_session_with_id(SessionId::new()).await
    }

    pub async fn open_session_with_id(&self, id: SessionId) -> Result<Session> {
        if self.sessions.get(&id).is_some() {
            return Err(PipelineError::SessionExists(id));
        }
        let output_dir = self
            .workdirs
            .allocate(&id)
            .map_err(|e| PipelineError::Provider(format!("{e:#}")))?;
        let session = Session::new(id.clone(), output_dir);
        if !self.sessions.insert(session.clone())? {
            return Err(PipelineError::SessionExists(id));
        }
        obs::emit_session_opened(&session.id, &session.output_dir);
        Ok(session)
    }

    /// Close a session once any in-flight submission has finished.
    pub async fn close_session(&self, id: &SessionId) -> Result<Session> {
        let lock = self.sessions.lock(id);
        let _guard = lock.lock().await;
        let session = self
            .sessions
            .close(id)?
            .ok_or_else(|| PipelineError::SessionNotFound(id.clone()))?;
        obs::emit_session_closed(id, "requested");
        Ok(session)
    }

    /// Close active sessions idle for longer than `max_idle`. Sessions with a
    /// submission in flight are not idle and are skipped.
    pub async fn close_idle(&self, max_idle: Duration) -> Result<Vec<SessionId>> {
        let mut closed = Vec::new();
        for session in self.sessions.list() {
            if !session.is_active() {
                continue;
            }
            let lock = self.sessions.lock(&session.id);
            let Ok(_guard) = lock.try_lock() else {
                continue;
            };
            let Some(current) = self.sessions.get(&session.id) else {
                continue;
            };
            let idle = current.idle_for(Utc::now()).to_std().unwrap_or_default();
            if current.is_active() && idle > max_idle {
                self.sessions.close(&current.id)?;
                obs::emit_session_closed(&current.id, "idle");
                closed.push(current.id);
            }
        }
        Ok(closed)
    }

    pub fn session(&self, id: &SessionId) -> Result<Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| PipelineError::SessionNotFound(id.clone()))
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.list()
    }

    fn active_session(&self, id: &SessionId) -> Result<Session> {
        let session = self.session(id)?;
        if !session.is_active() {
            return Err(PipelineError::SessionClosed(id.clone()));
        }
        Ok(session)
    }

    // -- submissions --------------------------------------------------------

    pub async fn submit(
        &self,
        session_id: &SessionId,
        request: SubmitRequest,
    ) -> Result<SubmitResponse> {
        self.submit_with_cancel(session_id, request, &CancelHandle::new())
            .await
    }

    /// Submit with a cancel switch. Cancelling while queued for the session
    /// lock withdraws the submission; cancelling while the code runs kills
    /// it and records a `cancelled` failure.
    pub async fn submit_with_cancel(
        &self,
        session_id: &SessionId,
        request: SubmitRequest,
        cancel: &CancelHandle,
    ) -> Result<SubmitResponse> {
        self.submit_inner(session_id, request, cancel)
            .instrument(obs::session_span(session_id))
            .await
    }

    async fn submit_inner(
        &self,
        session_id: &SessionId,
        request: SubmitRequest,
        cancel: &CancelHandle,
    ) -> Result<SubmitResponse> {
        self.active_session(session_id)?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let lock = self.sessions.lock(session_id);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            guard = lock.lock() => guard,
        };
        // The session may have been closed while this submission queued.
        let session = self.active_session(session_id)?;

        // Read under the lock: what is validated is what the code runs against.
        let snapshot = self
            .datasets
            .snapshot(session_id)
            .await
            .map_err(|e| PipelineError::Provider(format!("{e:#}")))?;
        let bounds = self
            .bounds
            .bounds(session_id)
            .await
            .map_err(|e| PipelineError::Provider(format!("{e:#}")))?;

        let attempt_id = Uuid::new_v4();
        let started_at = Utc::now();
        let code_digest = ContentDigest::from_bytes(request.code.as_bytes());
        let verdicts = self.guardrails.check(&request.code, &snapshot, &bounds);

        let prior = if request.confirmed {
            let records = self.ledger.list(session_id).await?;
            gate::find_prior(&records, &code_digest, request.prior_seq)?
        } else {
            None
        };
        let mut evaluation = gate::evaluate(verdicts, request.confirmed, prior.as_ref())?;
        METRICS.inc_submissions();

        let verdict = evaluation.verdict();
        obs::emit_gate_evaluated(session_id, attempt_id, evaluation.state(), &verdict);

        let mut record = NewExecutionRecord {
            attempt_id,
            code: request.code,
            code_digest,
            confirmed_flag: request.confirmed,
            prior_seq: evaluation.prior_seq,
            verdicts: evaluation.verdicts.clone(),
            confirmation: evaluation.confirmation,
            outcome: Outcome::Blocked,
            failure: None,
            output: None,
            inputs: request.inputs,
            started_at,
            ended_at: started_at,
        };

        if let Some(reason) = evaluation.block.clone() {
            obs::emit_submission_blocked(session_id, attempt_id, &verdict);
            record.ended_at = Utc::now();
            let stored = self.append(&session, record).await?;
            let (status, uncovered) = match reason {
                BlockReason::Critical => (SubmitStatus::Blocked, Vec::new()),
                BlockReason::NeedsConfirmation { uncovered } => {
                    (SubmitStatus::NeedsConfirmation, uncovered)
                }
            };
            return Ok(SubmitResponse {
                status,
                verdict,
                result: None,
                seq: stored.seq,
                correlation_id: attempt_id,
                confirmed_flag: stored.confirmed_flag,
                confirmation: stored.confirmation,
                uncovered,
                gate_trail: evaluation.trail().to_vec(),
            });
        }

        let executed = self
            .executor
            .execute(
                ExecutionRequest {
                    attempt_id,
                    code: &record.code,
                    output_dir: &session.output_dir,
                },
                cancel,
            )
            .await;
        evaluation.mark_executed()?;

        match executed {
            Ok(result) => {
                record.outcome = result.outcome;
                record.failure = result.failure.clone();
                record.output = Some(result.output.clone());
                record.ended_at = result.ended_at.max(started_at);
                let stored = self.append(&session, record).await?;
                obs::emit_execution_finished(&stored);
                Ok(SubmitResponse {
                    status: SubmitStatus::Executed,
                    verdict,
                    result: Some(RunResult {
                        outcome: result.outcome,
                        failure: result.failure,
                        output: result.output,
                    }),
                    seq: stored.seq,
                    correlation_id: attempt_id,
                    confirmed_flag: stored.confirmed_flag,
                    confirmation: stored.confirmation,
                    uncovered: Vec::new(),
                    gate_trail: evaluation.trail().to_vec(),
                })
            }
            Err(source) => {
                warn!(attempt_id = %attempt_id, error = %source, "sandbox could not run submission");
                record.outcome = Outcome::ExecutedFailure;
                record.failure = Some(FailureKind::SandboxUnavailable {
                    reason: source.to_string(),
                });
                record.ended_at = Utc::now();
                let stored = self.append(&session, record).await?;
                obs::emit_execution_finished(&stored);
                Err(PipelineError::SandboxUnavailable {
                    correlation_id: attempt_id,
                    source,
                })
            }
        }
    }

    /// Append, or leave an orphan file behind and fail the submission.
    async fn append(
        &self,
        session: &Session,
        record: NewExecutionRecord,
    ) -> Result<ExecutionRecord> {
        let attempt_id = record.attempt_id;
        match self.ledger.append(&session.id, record.clone()).await {
            Ok(stored) => {
                obs::emit_ledger_appended(&stored);
                METRICS.record_outcome(stored.outcome, stored.failure.as_ref());
                if let Err(e) = self.sessions.touch(&session.id) {
                    warn!(session_id = %session.id, error = %e, "failed to update session activity");
                }
                Ok(stored)
            }
            Err(source) => {
                obs::emit_ledger_write_failed(&session.id, attempt_id, &source);
                self.write_orphan(&session.id, &record).await;
                Err(PipelineError::LedgerWrite {
                    correlation_id: attempt_id,
                    source,
                })
            }
        }
    }

    async fn write_orphan(&self, session_id: &SessionId, record: &NewExecutionRecord) {
        let Some(dir) = self.sessions.orphan_dir(session_id) else {
            return;
        };
        let path = dir.join(format!("{}.json", record.attempt_id));
        let written = async {
            let bytes = serde_json::to_vec_pretty(record).map_err(std::io::Error::from)?;
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match written {
            Ok(()) => warn!(path = %path.display(), "unrecorded attempt saved as orphan"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save orphaned attempt"),
        }
    }

    // -- ledger views -------------------------------------------------------

    /// Every record of the session in sequence order. Readable after close.
    pub async fn get_log(&self, session_id: &SessionId) -> Result<Vec<ExecutionRecord>> {
        self.session(session_id)?;
        Ok(self.ledger.list(session_id).await?)
    }

    /// Check numbering and the hash chain. Returns the record count.
    pub async fn verify_log(&self, session_id: &SessionId) -> Result<usize> {
        let records = self.get_log(session_id).await?;
        verify_chain(&records)?;
        Ok(records.len())
    }

    pub async fn curate_script(&self, session_id: &SessionId) -> Result<CuratedScript> {
        let session = self.session(session_id)?;
        let records = self.ledger.list(session_id).await?;
        let script = curator::curate(
            session_id,
            &records,
            Some(&session.output_dir),
            self.curator.dialect,
        );
        obs::emit_script_curated(session_id, script.selected.len(), script.dropped.len());
        Ok(script)
    }

    /// Regenerate the script and write it into the session output directory.
    pub async fn save_curated_script(
        &self,
        session_id: &SessionId,
    ) -> Result<(PathBuf, CuratedScript)> {
        let script = self.curate_script(session_id).await?;
        let session = self.session(session_id)?;
        let path = session.output_dir.join(self.curator.file_name());
        let mut tmp = tempfile::NamedTempFile::new_in(&session.output_dir)?;
        tmp.write_all(script.text.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok((path, script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigor_ledger::{Finding, FindingSource, Severity};

    fn response(status: SubmitStatus, findings: Vec<Finding>) -> SubmitResponse {
        SubmitResponse {
            status,
            verdict: Verdict::from_findings(findings),
            result: None,
            seq: 4,
            correlation_id: Uuid::nil(),
            confirmed_flag: false,
            confirmation: ConfirmationStatus::RequiredPending,
            uncovered: Vec::new(),
            gate_trail: vec![GateState::Received, GateState::Scanned],
        }
    }

    #[test]
    fn test_request_builder() {
        let req = SubmitRequest::new("print(1)")
            .confirmed(true)
            .prior_seq(3)
            .inputs(["/data/a.csv"]);
        assert!(req.confirmed);
        assert_eq!(req.prior_seq, Some(3));
        assert_eq!(req.inputs, vec!["/data/a.csv".to_string()]);
    }

    #[test]
    fn test_review_message_is_verbatim() {
        let finding = Finding::new(
            FindingSource::Data,
            Severity::Warning,
            "data.zero-variance",
            "Column 'v' has zero variance (constant values)",
        )
        .with_subject("v");
        let msg = response(SubmitStatus::NeedsConfirmation, vec![finding]).review_message();
        assert!(msg.starts_with("Submission needs confirmation (record #4)"));
        assert!(msg.contains(
            "[WARNING] data.zero-variance: Column 'v' has zero variance (constant values) (v)"
        ));
    }

    #[test]
    fn test_review_message_lists_uncovered_warnings() {
        let mut resp = response(SubmitStatus::NeedsConfirmation, Vec::new());
        resp.confirmed_flag = true;
        resp.uncovered = vec![Fingerprint {
            rule_id: "bounds.out-of-range".into(),
            subject: Some("temperature".into()),
        }];
        assert!(resp
            .review_message()
            .contains("Not covered by an earlier confirmation: bounds.out-of-range (temperature)"));
    }

    #[test]
    fn test_status_serializes_as_blocked_or_executed() {
        let json = serde_json::to_value(response(SubmitStatus::NeedsConfirmation, Vec::new()))
            .unwrap();
        assert_eq!(json["status"], "blocked");
        assert_eq!(json["reason"], "needs_confirmation");
        assert_eq!(json["seq"], 4);

        let json = serde_json::to_value(response(SubmitStatus::Blocked, Vec::new())).unwrap();
        assert_eq!(json["status"], "blocked");
        assert_eq!(json["reason"], "critical");

        let json = serde_json::to_value(response(SubmitStatus::Executed, Vec::new())).unwrap();
        assert_eq!(json["status"], "executed");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_review_message_for_critical() {
        let finding = Finding::new(
            FindingSource::Scanner,
            Severity::Critical,
            "synthetic.random-generation",
            "Random data generation",
        );
        let msg = response(SubmitStatus::Blocked, vec![finding]).review_message();
        assert!(msg.contains("CRITICAL rigor violations"));
        assert!(msg.contains("[CRITICAL] synthetic.random-generation"));
    }
}
