//! Structured lifecycle events.
//!
//! Every event is an `info!` (or `warn!` for failures) carrying an `event`
//! field, so JSON logs can be filtered on it. Filter with `RIGOR_LOG`.

use tracing::{info, warn};
use uuid::Uuid;

use rigor_ledger::{ExecutionRecord, SessionId, Verdict};

use crate::gate::GateState;

/// Span tagging everything inside it with the session id.
pub fn session_span(session_id: &SessionId) -> tracing::Span {
    tracing::info_span!("rigor.session", session_id = %session_id)
}

pub fn emit_session_opened(session_id: &SessionId, output_dir: &std::path::Path) {
    info!(
        event = "session.opened",
        session_id = %session_id,
        output_dir = %output_dir.display(),
    );
}

pub fn emit_session_closed(session_id: &SessionId, reason: &str) {
    info!(event = "session.closed", session_id = %session_id, reason = reason);
}

pub fn emit_gate_evaluated(
    session_id: &SessionId,
    attempt_id: Uuid,
    state: GateState,
    verdict: &Verdict,
) {
    info!(
        event = "gate.evaluated",
        session_id = %session_id,
        attempt_id = %attempt_id,
        state = %state,
        findings = verdict.len(),
        critical = verdict.has_critical(),
        warnings = verdict.has_warnings(),
    );
}

/// Rule ids only; the full text goes back to the caller.
pub fn emit_submission_blocked(session_id: &SessionId, attempt_id: Uuid, verdict: &Verdict) {
    let rules: Vec<&str> = verdict.iter().map(|f| f.rule_id.as_str()).collect();
    info!(
        event = "submission.blocked",
        session_id = %session_id,
        attempt_id = %attempt_id,
        rules = ?rules,
    );
}

pub fn emit_execution_finished(record: &ExecutionRecord) {
    info!(
        event = "execution.finished",
        session_id = %record.session_id,
        attempt_id = %record.attempt_id,
        seq = record.seq,
        outcome = %record.outcome,
        failure = ?record.failure,
        duration_ms = ?record.output.as_ref().map(|o| o.duration_ms),
        artifacts = record.artifacts().len(),
    );
}

pub fn emit_ledger_appended(record: &ExecutionRecord) {
    info!(
        event = "ledger.appended",
        session_id = %record.session_id,
        seq = record.seq,
        digest = %record.record_digest,
    );
}

pub fn emit_ledger_write_failed(
    session_id: &SessionId,
    attempt_id: Uuid,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "ledger.write_failed",
        session_id = %session_id,
        attempt_id = %attempt_id,
        error = %error,
    );
}

pub fn emit_script_curated(session_id: &SessionId, selected: usize, dropped: usize) {
    info!(
        event = "script.curated",
        session_id = %session_id,
        selected = selected,
        dropped = dropped,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_inside_session_span() {
        let _span = session_span(&SessionId::from("obs-test")).entered();
        emit_session_closed(&SessionId::from("obs-test"), "test");
    }
}
