//! Rigor gate evaluation: verdict plus confirmation flag in, decision out.
//!
//! A confirmation only covers warnings that were already shown to a human.
//! The prior verdict is looked up in the session ledger; the fingerprints of
//! its WARNING findings are the set a confirmed resubmission may carry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use rigor_ledger::{
    ConfirmationStatus, ContentDigest, ExecutionRecord, Fingerprint, RecordVerdicts, Verdict,
};

use super::error::{GateError, GateResult};
use super::state::{GateMachine, GateState};

/// The blocked record a confirmation answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorVerdict {
    pub seq: u64,
    pub warnings: BTreeSet<Fingerprint>,
}

impl PriorVerdict {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            seq: record.seq,
            warnings: record.verdict().warning_fingerprints(),
        }
    }
}

/// Locate the prior verdict for a confirmed submission.
///
/// With an explicit `seq` the record must exist, be awaiting confirmation and
/// hold the same code. Otherwise the latest `required-pending` record with the
/// same code digest is used, if any.
pub fn find_prior(
    records: &[ExecutionRecord],
    code_digest: &ContentDigest,
    explicit_seq: Option<u64>,
) -> GateResult<Option<PriorVerdict>> {
    if let Some(seq) = explicit_seq {
        let record = records
            .iter()
            .find(|r| r.seq == seq)
            .ok_or(GateError::PriorNotFound { seq })?;
        if record.confirmation != ConfirmationStatus::RequiredPending {
            return Err(GateError::PriorNotPending { seq });
        }
        if &record.code_digest != code_digest {
            return Err(GateError::PriorCodeMismatch { seq });
        }
        return Ok(Some(PriorVerdict::from_record(record)));
    }

    Ok(records
        .iter()
        .rev()
        .find(|r| {
            r.confirmation == ConfirmationStatus::RequiredPending && &r.code_digest == code_digest
        })
        .map(PriorVerdict::from_record))
}

/// Why a submission did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// At least one CRITICAL finding.
    Critical,
    /// Warnings that no prior confirmation covers.
    NeedsConfirmation { uncovered: Vec<Fingerprint> },
}

/// Result of running a submission through the gate.
#[derive(Debug, Clone)]
pub struct GateEvaluation {
    pub verdicts: RecordVerdicts,
    pub confirmed_flag: bool,
    pub confirmation: ConfirmationStatus,
    pub block: Option<BlockReason>,
    pub prior_seq: Option<u64>,
    machine: GateMachine,
}

impl GateEvaluation {
    /// Whether the executor may run the code.
    pub fn proceeds(&self) -> bool {
        self.block.is_none()
    }

    pub fn verdict(&self) -> Verdict {
        self.verdicts.merged()
    }

    pub fn state(&self) -> GateState {
        self.machine.state()
    }

    pub fn trail(&self) -> &[GateState] {
        self.machine.trail()
    }

    /// Move to EXECUTED once the executor has finished, whatever its result.
    pub fn mark_executed(&mut self) -> GateResult<()> {
        self.machine.advance(GateState::Executed)?;
        Ok(())
    }
}

/// Decide whether a submission may run.
pub fn evaluate(
    verdicts: RecordVerdicts,
    confirmed: bool,
    prior: Option<&PriorVerdict>,
) -> GateResult<GateEvaluation> {
    let mut machine = GateMachine::new();
    machine.advance(GateState::Scanned)?;
    let merged = verdicts.merged();

    if merged.has_critical() {
        machine.advance(GateState::Blocked)?;
        return Ok(GateEvaluation {
            verdicts,
            confirmed_flag: confirmed,
            confirmation: ConfirmationStatus::NotRequired,
            block: Some(BlockReason::Critical),
            prior_seq: prior.map(|p| p.seq),
            machine,
        });
    }

    if !merged.has_warnings() {
        machine.advance(GateState::Clean)?;
        return Ok(GateEvaluation {
            verdicts,
            confirmed_flag: confirmed,
            confirmation: ConfirmationStatus::NotRequired,
            block: None,
            prior_seq: None,
            machine,
        });
    }

    machine.advance(GateState::NeedsConfirmation)?;
    let current = merged.warning_fingerprints();
    let uncovered: Vec<Fingerprint> = match (confirmed, prior) {
        (true, Some(p)) => current.difference(&p.warnings).cloned().collect(),
        _ => current.into_iter().collect(),
    };

    if confirmed && prior.is_some() && uncovered.is_empty() {
        return Ok(GateEvaluation {
            verdicts,
            confirmed_flag: confirmed,
            confirmation: ConfirmationStatus::Confirmed,
            block: None,
            prior_seq: prior.map(|p| p.seq),
            machine,
        });
    }

    machine.advance(GateState::Blocked)?;
    Ok(GateEvaluation {
        verdicts,
        confirmed_flag: confirmed,
        confirmation: ConfirmationStatus::RequiredPending,
        block: Some(BlockReason::NeedsConfirmation { uncovered }),
        prior_seq: prior.map(|p| p.seq),
        machine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rigor_ledger::{Finding, FindingSource, NewExecutionRecord, Outcome, SessionId, Severity};
    use uuid::Uuid;

    fn warn(rule: &str, subject: &str) -> Finding {
        Finding::new(FindingSource::Data, Severity::Warning, rule, format!("{subject} looks off"))
            .with_subject(subject)
    }

    fn verdicts(data: Vec<Finding>, scan: Vec<Finding>) -> RecordVerdicts {
        RecordVerdicts {
            scan: Verdict::from_findings(scan),
            data: Verdict::from_findings(data),
            bounds: Verdict::new(),
        }
    }

    fn pending_record(seq: u64, code: &str, data: Vec<Finding>) -> ExecutionRecord {
        let now = Utc::now();
        let new = NewExecutionRecord {
            attempt_id: Uuid::new_v4(),
            code: code.into(),
            code_digest: ContentDigest::from_bytes(code.as_bytes()),
            confirmed_flag: false,
            prior_seq: None,
            verdicts: verdicts(data, vec![]),
            confirmation: ConfirmationStatus::RequiredPending,
            outcome: Outcome::Blocked,
            failure: None,
            output: None,
            inputs: vec![],
            started_at: now,
            ended_at: now,
        };
        ExecutionRecord::seal(SessionId::from("s"), seq, new, None).unwrap()
    }

    #[test]
    fn test_clean_verdict_proceeds_without_confirmation() {
        let eval = evaluate(RecordVerdicts::default(), false, None).unwrap();
        assert!(eval.proceeds());
        assert_eq!(eval.confirmation, ConfirmationStatus::NotRequired);
        assert_eq!(eval.state(), GateState::Clean);
    }

    #[test]
    fn test_critical_blocks_even_when_confirmed() {
        let crit = Finding::new(FindingSource::Scanner, Severity::Critical, "escape.shell", "no");
        let prior = PriorVerdict {
            seq: 1,
            warnings: BTreeSet::new(),
        };
        let eval = evaluate(verdicts(vec![], vec![crit]), true, Some(&prior)).unwrap();
        assert!(!eval.proceeds());
        assert_eq!(eval.block, Some(BlockReason::Critical));
        assert_eq!(eval.confirmation, ConfirmationStatus::NotRequired);
        assert!(eval.confirmed_flag);
        assert_eq!(eval.state(), GateState::Blocked);
    }

    #[test]
    fn test_unconfirmed_warning_needs_confirmation() {
        let eval = evaluate(verdicts(vec![warn("data.zero-variance", "v")], vec![]), false, None)
            .unwrap();
        assert_eq!(eval.confirmation, ConfirmationStatus::RequiredPending);
        assert_eq!(
            eval.trail(),
            &[
                GateState::Received,
                GateState::Scanned,
                GateState::NeedsConfirmation,
                GateState::Blocked
            ]
        );
    }

    #[test]
    fn test_confirmed_same_warnings_proceed() {
        let prior_rec = pending_record(1, "plot(v)", vec![warn("data.zero-variance", "v")]);
        let prior = PriorVerdict::from_record(&prior_rec);
        let mut eval =
            evaluate(verdicts(vec![warn("data.zero-variance", "v")], vec![]), true, Some(&prior))
                .unwrap();
        assert!(eval.proceeds());
        assert_eq!(eval.confirmation, ConfirmationStatus::Confirmed);
        assert_eq!(eval.prior_seq, Some(1));
        eval.mark_executed().unwrap();
        assert_eq!(eval.state(), GateState::Executed);
    }

    #[test]
    fn test_confirmed_new_warning_is_not_covered() {
        let prior_rec = pending_record(1, "plot(v)", vec![warn("data.zero-variance", "v")]);
        let prior = PriorVerdict::from_record(&prior_rec);
        let eval = evaluate(
            verdicts(
                vec![warn("data.zero-variance", "v"), warn("data.nan", "w")],
                vec![],
            ),
            true,
            Some(&prior),
        )
        .unwrap();
        assert_eq!(eval.confirmation, ConfirmationStatus::RequiredPending);
        match eval.block {
            Some(BlockReason::NeedsConfirmation { uncovered }) => {
                assert_eq!(uncovered.len(), 1);
                assert_eq!(uncovered[0].rule_id, "data.nan");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_confirmed_without_prior_needs_confirmation() {
        let eval =
            evaluate(verdicts(vec![warn("data.nan", "x")], vec![]), true, None).unwrap();
        assert!(!eval.proceeds());
        assert_eq!(eval.confirmation, ConfirmationStatus::RequiredPending);
    }

    #[test]
    fn test_find_prior_by_digest_and_explicit_seq() {
        let a = pending_record(1, "plot(v)", vec![warn("data.nan", "v")]);
        let b = pending_record(2, "other()", vec![warn("data.nan", "v")]);
        let records = vec![a, b];

        let digest = ContentDigest::from_bytes(b"plot(v)");
        let found = find_prior(&records, &digest, None).unwrap().unwrap();
        assert_eq!(found.seq, 1);

        let explicit = find_prior(&records, &digest, Some(1)).unwrap().unwrap();
        assert_eq!(explicit.seq, 1);

        // Seq 2 was shown for other code; it cannot approve this one.
        assert!(matches!(
            find_prior(&records, &digest, Some(2)),
            Err(GateError::PriorCodeMismatch { seq: 2 })
        ));

        assert!(matches!(
            find_prior(&records, &digest, Some(9)),
            Err(GateError::PriorNotFound { seq: 9 })
        ));
        assert!(find_prior(&records, &ContentDigest::from_bytes(b"new"), None)
            .unwrap()
            .is_none());
    }
}
