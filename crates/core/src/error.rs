use crate::types::{NodeId, Phase, TagSet};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// The worker has contacted the orchestrator but has no tags yet.
    #[error("Worker {0} is unconfigured")]
    WorkerUnconfigured(String),

    /// A phase report was submitted twice for the same job.
    #[error("Duplicate {phase} report for {node_id}")]
    DuplicatePhaseReport { node_id: NodeId, phase: Phase },

    /// Submitted jobs require tags that no active worker provides.
    #[error("Jobs with unprocessable tags: {0:?}")]
    UnschedulableTags(TagSet),

    /// No connected worker can run this job.
    #[error("Job {node_id} has no compatible worker: requires {requirements:?}")]
    UnschedulableJob { node_id: NodeId, requirements: TagSet },

    #[error("Workers collected different jobs: {0}")]
    CollectionMismatch(String),

    #[error("Session {0} is stopped")]
    SessionStopped(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn session_not_found(id: &str) -> Self {
        CoreError::NotFound {
            entity: "Session",
            id: id.to_string(),
        }
    }

    pub fn worker_not_found(id: &str) -> Self {
        CoreError::NotFound {
            entity: "Worker",
            id: id.to_string(),
        }
    }

    pub fn job_not_found(node_id: &str) -> Self {
        CoreError::NotFound {
            entity: "Job",
            id: node_id.to_string(),
        }
    }
}
