//! Phase report payload exchanged between execution engines and report
//! listeners.
//!
//! The orchestrator stores reports as opaque strings and never parses them;
//! only the engine that produces a report and the listener that consumes it
//! agree on this format.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Phase};

/// Result of one phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl Outcome {
    /// Whether this outcome should make the overall run fail.
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Error)
    }
}

/// A single phase report as produced by an execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub node_id: NodeId,
    pub phase: Phase,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Failure representation (captured output, error text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longrepr: Option<String>,
}

impl PhaseReport {
    pub fn new(node_id: impl Into<NodeId>, phase: Phase, outcome: Outcome) -> Self {
        Self {
            node_id: node_id.into(),
            phase,
            outcome,
            duration_ms: 0,
            worker_id: None,
            longrepr: None,
        }
    }

    /// Serialise to the opaque string carried by the protocol.
    pub fn encode(&self) -> String {
        // Plain data with string keys: serialisation cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a report string produced by [`encode`](Self::encode).
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
