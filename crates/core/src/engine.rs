//! Seams to the external test-execution engine.
//!
//! The orchestration layer never runs test logic itself. A worker hands each
//! assigned job to an [`ExecutionEngine`], which emits phase reports through
//! a [`ReportSink`]. On the client side, fetched reports are forwarded to a
//! [`ReportListener`].

use std::path::PathBuf;

use async_trait::async_trait;

use crate::types::{NodeId, Phase};

/// A job handed to an engine, with the job expected to follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAssignment {
    pub node_id: NodeId,
    /// Lookahead hint, e.g. to keep a shared fixture alive. Not a reservation.
    pub next: Option<NodeId>,
    /// Unpacked environment bundle of the session, when one was uploaded.
    pub working_dir: Option<PathBuf>,
}

/// Receives phase reports while a job is executing.
///
/// `emit` is called from inside the engine's own control flow and must not
/// block on I/O.
pub trait ReportSink: Send + Sync {
    fn emit(&self, node_id: &str, phase: Phase, report: String);
}

/// Runs a single job and reports its phases.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn run_job(&self, job: &JobAssignment, sink: &dyn ReportSink) -> Result<(), EngineError>;
}

/// Consumes completed phase reports on the side that owns the test run.
pub trait ReportListener: Send {
    fn on_report(&mut self, node_id: &str, phase: Phase, report: &str);
}

/// Errors raised by an execution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine does not know this job.
    #[error("Unknown job: {0}")]
    UnknownJob(NodeId),

    /// The job could not be started.
    #[error("Failed to launch {node_id}: {message}")]
    Launch { node_id: NodeId, message: String },
}
