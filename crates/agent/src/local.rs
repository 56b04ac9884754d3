//! Run a job collection on in-process workers, without an orchestrator.

use std::sync::Arc;

use hildist_core::engine::{ExecutionEngine, ReportListener};
use hildist_store::models::job::JobSpec;
use hildist_worker::{LocalPool, LocalWorker};

use crate::error::DriverError;

/// Run `jobs` on `workers` and fail if any job did not complete.
pub async fn run_local(
    workers: Vec<LocalWorker>,
    engine: Arc<dyn ExecutionEngine>,
    jobs: Vec<JobSpec>,
    listener: &mut dyn ReportListener,
) -> Result<usize, DriverError> {
    for worker in &workers {
        tracing::info!(worker = %worker.id, tags = ?worker.tags, "Local worker");
    }

    let outcome = LocalPool::new(workers, engine).run(jobs, listener).await?;
    if !outcome.is_complete() {
        return Err(DriverError::Incomplete {
            missing: outcome.incomplete,
        });
    }
    Ok(outcome.completed.len())
}
