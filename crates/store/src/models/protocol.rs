//! Request and response bodies of the Dispatch Protocol.
//!
//! Shared by the HTTP server and the typed client so both sides agree on
//! field names. Job ids are called `nodeid` on the wire.

use hildist_core::types::{NodeId, Phase, PollResult, WorkerAction};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::job::JobSpec;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
}

/// Answer to a worker looking for a session; `null` when there is none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSessionResponse {
    pub session_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Jobs and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobsRequest {
    pub tests: Vec<JobSpec>,
}

/// Present phases per job, in submission order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusesResponse {
    pub statuses: IndexMap<NodeId, Vec<Phase>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReportRequest {
    #[serde(rename = "nodeid")]
    pub node_id: NodeId,
    pub phase: Phase,
    pub report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportQuery {
    #[serde(rename = "nodeid")]
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub report: String,
}

/// Wire form of [`PollResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub action: WorkerAction,
    #[serde(default)]
    pub test_now: Option<NodeId>,
    #[serde(default)]
    pub test_next: Option<NodeId>,
}

impl From<PollResult> for PollResponse {
    fn from(result: PollResult) -> Self {
        match result {
            PollResult::Run { now, next } => Self {
                action: WorkerAction::Run,
                test_now: Some(now),
                test_next: next,
            },
            PollResult::Stop => Self {
                action: WorkerAction::Stop,
                test_now: None,
                test_next: None,
            },
        }
    }
}

impl PollResponse {
    /// Back to the domain type. A `run` without a job is treated as `stop`.
    pub fn into_poll_result(self) -> PollResult {
        match (self.action, self.test_now) {
            (WorkerAction::Run, Some(now)) => PollResult::Run {
                now,
                next: self.test_next,
            },
            _ => PollResult::Stop,
        }
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A worker's artifact bundle, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactUpload {
    pub worker_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactListResponse {
    pub artifact_ids: Vec<String>,
}
