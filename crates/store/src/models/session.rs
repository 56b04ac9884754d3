//! Session views.

use hildist_core::types::{SessionState, Timestamp};
use serde::{Deserialize, Serialize};

/// Number of jobs in each dispatch status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
}

/// Diagnostic snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub jobs: JobCounts,
    /// Workers that were handed at least one job, sorted.
    pub workers: Vec<String>,
    pub artifacts: usize,
    pub created_at: Timestamp,
}
