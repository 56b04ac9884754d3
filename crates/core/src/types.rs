use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Stable identifier of a dispatchable job (a collected test node id).
pub type NodeId = String;

/// A set of capability tags, kept sorted so it serialises deterministically.
pub type TagSet = BTreeSet<String>;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// The three report points of a job's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 3] = [Phase::Setup, Phase::Call, Phase::Teardown];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        }
    }

    /// Teardown is the last report a job produces; its presence marks the
    /// job as finished.
    pub fn is_terminal(self) -> bool {
        self == Phase::Teardown
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle states
// ---------------------------------------------------------------------------

/// Dispatch status of a job within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
}

/// Lifecycle of a session: `Setup -> Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Setup,
    Running,
    Stopped,
}

/// Wire form of a poll answer's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerAction {
    Run,
    Stop,
}

/// Outcome of a worker asking for its next job.
///
/// `next` is a lookahead hint only: it is not reserved for the worker and
/// may be claimed by another worker before the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Run { now: NodeId, next: Option<NodeId> },
    Stop,
}

impl PollResult {
    pub fn action(&self) -> WorkerAction {
        match self {
            PollResult::Run { .. } => WorkerAction::Run,
            PollResult::Stop => WorkerAction::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered_by_execution() {
        let mut phases = vec![Phase::Teardown, Phase::Setup, Phase::Call];
        phases.sort();
        assert_eq!(phases, Phase::ALL.to_vec());
    }

    #[test]
    fn phase_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Phase::Teardown).unwrap(), "\"teardown\"");
        let parsed: Phase = serde_json::from_str("\"call\"").unwrap();
        assert_eq!(parsed, Phase::Call);
    }

    #[test]
    fn only_teardown_is_terminal() {
        assert!(Phase::Teardown.is_terminal());
        assert!(!Phase::Setup.is_terminal());
        assert!(!Phase::Call.is_terminal());
    }

    #[test]
    fn poll_result_maps_to_action() {
        let run = PollResult::Run {
            now: "a".into(),
            next: None,
        };
        assert_eq!(run.action(), WorkerAction::Run);
        assert_eq!(PollResult::Stop.action(), WorkerAction::Stop);
    }
}
