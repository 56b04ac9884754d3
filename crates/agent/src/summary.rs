//! Aggregates phase reports into a run summary.

use std::collections::BTreeSet;

use hildist_core::engine::ReportListener;
use hildist_core::report::{Outcome, PhaseReport};
use hildist_core::types::{NodeId, Phase};

/// Counts outcomes and remembers failing jobs.
///
/// The call phase decides whether a job passed, failed or was skipped;
/// a failing setup or teardown counts as an error. Reports that do not
/// decode are counted as errors too.
#[derive(Debug, Default)]
pub struct SummaryReporter {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    failing: BTreeSet<NodeId>,
    reports: usize,
}

impl SummaryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any report should make the run exit non-zero.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }

    /// Jobs with at least one failing phase, sorted.
    pub fn failing(&self) -> impl Iterator<Item = &str> {
        self.failing.iter().map(String::as_str)
    }

    pub fn reports_seen(&self) -> usize {
        self.reports
    }

    /// Log the totals.
    pub fn log(&self) {
        tracing::info!(
            passed = self.passed,
            failed = self.failed,
            skipped = self.skipped,
            errors = self.errors,
            "Run summary"
        );
    }
}

impl ReportListener for SummaryReporter {
    fn on_report(&mut self, node_id: &str, phase: Phase, report: &str) {
        self.reports += 1;

        let outcome = match PhaseReport::decode(report) {
            Ok(report) => report.outcome,
            Err(e) => {
                tracing::warn!(node_id, phase = %phase, error = %e, "Undecodable phase report");
                Outcome::Error
            }
        };

        match (phase, outcome) {
            (Phase::Call, Outcome::Passed) => self.passed += 1,
            (Phase::Call, Outcome::Failed) => self.failed += 1,
            (Phase::Call, Outcome::Skipped) => self.skipped += 1,
            (_, outcome) if outcome.is_failure() => self.errors += 1,
            _ => {}
        }

        if outcome.is_failure() {
            tracing::warn!(node_id, phase = %phase, outcome = ?outcome, "Job phase failed");
            self.failing.insert(node_id.to_string());
        } else {
            tracing::debug!(node_id, phase = %phase, outcome = ?outcome, "Job phase finished");
        }
    }
}
