//! Process-wide submission counters.
//!
//! Incremented by the pipeline as submissions resolve; [`Metrics::flush`]
//! writes the current values as one `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use rigor_ledger::{FailureKind, Outcome};

pub static METRICS: Metrics = Metrics::new();

/// Atomic counters. No locking.
pub struct Metrics {
    submissions: AtomicU64,
    blocked: AtomicU64,
    executed_success: AtomicU64,
    executed_failure: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub submissions: u64,
    pub blocked: u64,
    pub executed_success: u64,
    pub executed_failure: u64,
    pub timeouts: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            submissions: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            executed_success: AtomicU64::new(0),
            executed_failure: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// A submission was accepted (session lock acquired).
    pub fn inc_submissions(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "submissions", "counter incremented");
    }

    /// Count a finalized record by its outcome.
    pub fn record_outcome(&self, outcome: Outcome, failure: Option<&FailureKind>) {
        let counter = match outcome {
            Outcome::Blocked => &self.blocked,
            Outcome::ExecutedSuccess => &self.executed_success,
            Outcome::ExecutedFailure => &self.executed_failure,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if matches!(failure, Some(FailureKind::ExecutionTimeout { .. })) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = %outcome, "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            executed_success: self.executed_success.load(Ordering::Relaxed),
            executed_failure: self.executed_failure.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            submissions = s.submissions,
            blocked = s.blocked,
            executed_success = s.executed_success,
            executed_failure = s.executed_failure,
            timeouts = s.timeouts,
        );
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        self.submissions.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
        self.executed_success.store(0, Ordering::Relaxed);
        self.executed_failure.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_counters() {
        let m = Metrics::new();
        m.inc_submissions();
        m.inc_submissions();
        m.inc_submissions();
        m.record_outcome(Outcome::Blocked, None);
        m.record_outcome(Outcome::ExecutedSuccess, None);
        m.record_outcome(
            Outcome::ExecutedFailure,
            Some(&FailureKind::ExecutionTimeout { limit_ms: 10 }),
        );

        assert_eq!(
            m.snapshot(),
            MetricsSnapshot {
                submissions: 3,
                blocked: 1,
                executed_success: 1,
                executed_failure: 1,
                timeouts: 1,
            }
        );
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_submissions();
        m.record_outcome(Outcome::Blocked, None);
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
