//! Job entity models and DTOs.

use std::collections::BTreeMap;

use hildist_core::types::{JobStatus, NodeId, Phase, TagSet};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity structs
// ---------------------------------------------------------------------------

/// A dispatchable job within a session.
#[derive(Debug, Clone)]
pub struct Job {
    pub node_id: NodeId,
    pub worker_requirements: TagSet,
    pub status: JobStatus,
    pub assigned_worker: Option<String>,
    /// Opaque phase reports, write-once per phase.
    pub reports: BTreeMap<Phase, String>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            node_id: spec.node_id,
            worker_requirements: spec.worker_requirements,
            status: JobStatus::Pending,
            assigned_worker: None,
            reports: BTreeMap::new(),
        }
    }

    /// Phases with a report, in execution order.
    pub fn present_phases(&self) -> Vec<Phase> {
        self.reports.keys().copied().collect()
    }

    /// A job is finished once its teardown report has arrived.
    pub fn has_teardown(&self) -> bool {
        self.reports.contains_key(&Phase::Teardown)
    }
}

// ---------------------------------------------------------------------------
// Create DTOs
// ---------------------------------------------------------------------------

/// A job as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "nodeid")]
    pub node_id: NodeId,
    #[serde(default)]
    pub worker_requirements: TagSet,
}

impl JobSpec {
    pub fn new(node_id: impl Into<NodeId>, requirements: &[&str]) -> Self {
        Self {
            node_id: node_id.into(),
            worker_requirements: requirements.iter().map(|s| s.to_string()).collect(),
        }
    }
}
