//! Worker side of a distributed run.
//!
//! Finds a session with work for this machine, pulls jobs one at a time and
//! runs them through the [`ExecutionEngine`]. Phase reports are submitted in
//! the background by a [`ReportUploader`] so the engine never waits on the
//! network; the uploader is drained before the run ends.
//!
//! When the client uploaded an environment bundle, it is unpacked into a
//! temporary directory that every job runs in.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use hildist_client::DispatchApi;
use hildist_core::engine::{ExecutionEngine, JobAssignment, ReportSink};
use hildist_core::types::{Phase, PollResult};
use hildist_core::worker_pool::HEARTBEAT_INTERVAL;

use crate::artifacts::{unzip_into, zip_dir};
use crate::error::DriverError;

/// Phase reports submitted concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

#[derive(Debug, Clone)]
pub struct WorkerDriverConfig {
    pub worker_id: String,
    /// Skip discovery and join this session.
    pub session_id: Option<String>,
    /// Pushed with `tags` before discovery when either is set.
    pub display_name: Option<String>,
    pub tags: Vec<String>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Local directory zipped and uploaded at the end of the run.
    pub artifacts_dir: Option<PathBuf>,
    pub max_in_flight: usize,
}

impl WorkerDriverConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            session_id: None,
            display_name: None,
            tags: Vec::new(),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            artifacts_dir: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// What a finished worker run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRunOutcome {
    pub session_id: String,
    pub jobs_run: usize,
    pub reports_submitted: usize,
    pub artifacts_uploaded: bool,
}

pub struct WorkerDriver {
    api: DispatchApi,
    engine: Arc<dyn ExecutionEngine>,
    config: WorkerDriverConfig,
}

impl WorkerDriver {
    pub fn new(api: DispatchApi, engine: Arc<dyn ExecutionEngine>, config: WorkerDriverConfig) -> Self {
        Self {
            api,
            engine,
            config,
        }
    }

    /// Run until the session has nothing left for this worker.
    ///
    /// Returns `Ok(None)` if `cancel` fires before a session is found.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Option<WorkerRunOutcome>, DriverError> {
        let worker_id = &self.config.worker_id;
        self.push_configuration().await?;

        let Some(session_id) = self.resolve_session(&cancel).await? else {
            return Ok(None);
        };
        // Removed when dropped at the end of the run.
        let env = self.prepare_env(&session_id).await?;
        self.signal_ready(&session_id);

        let heartbeat_cancel = cancel.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.api.clone(),
            worker_id.clone(),
            self.config.heartbeat_interval,
            heartbeat_cancel.clone(),
        ));

        let uploader = ReportUploader::new(self.api.clone(), &session_id, self.config.max_in_flight);
        let working_dir = env.as_ref().map(TempDir::path);
        let result = self
            .work_loop(&session_id, working_dir, &uploader, &cancel)
            .await;

        let failed = self.signal_done(&uploader).await;
        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat.await {
            tracing::warn!(error = %e, "Heartbeat task failed");
        }

        let jobs_run = result?;
        let artifacts_uploaded = self.upload_artifacts(&session_id).await?;

        if failed > 0 {
            return Err(DriverError::ReportUpload { failed });
        }

        Ok(Some(WorkerRunOutcome {
            session_id,
            jobs_run,
            reports_submitted: uploader.submitted(),
            artifacts_uploaded,
        }))
    }

    async fn push_configuration(&self) -> Result<(), DriverError> {
        let config = &self.config;
        if config.display_name.is_none() && config.tags.is_empty() {
            return Ok(());
        }

        // First contact registers the worker so the update has a target.
        self.api.heartbeat(&config.worker_id).await?;
        let display_name = config.display_name.as_deref().unwrap_or(&config.worker_id);
        self.api
            .update_worker(&config.worker_id, display_name, &config.tags)
            .await?;
        tracing::info!(
            worker_id = %config.worker_id,
            display_name,
            tags = ?config.tags,
            "Worker configuration pushed"
        );
        Ok(())
    }

    async fn resolve_session(&self, cancel: &CancellationToken) -> Result<Option<String>, DriverError> {
        if let Some(session_id) = &self.config.session_id {
            return Ok(Some(session_id.clone()));
        }

        tracing::info!(worker_id = %self.config.worker_id, "Waiting for a session");
        loop {
            if let Some(session_id) = self.api.resolve_session(&self.config.worker_id).await? {
                return Ok(Some(session_id));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Download and unpack the session's environment bundle.
    ///
    /// `None` when the client did not upload one.
    async fn prepare_env(&self, session_id: &str) -> Result<Option<TempDir>, DriverError> {
        let bundle = match self.api.download_env(session_id).await {
            Ok(bundle) => bundle,
            Err(e) if e.status() == Some(404) => {
                tracing::debug!(session_id, "Session has no environment bundle");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let dir = tempfile::Builder::new().prefix("hildist-env-").tempdir()?;
        unzip_into(&bundle, dir.path())?;
        tracing::info!(
            session_id,
            dir = %dir.path().display(),
            size = bundle.len(),
            "Environment unpacked"
        );
        Ok(Some(dir))
    }

    fn signal_ready(&self, session_id: &str) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            session_id,
            "Worker ready"
        );
    }

    /// Pull and run jobs until told to stop. Returns the number of jobs run.
    async fn work_loop(
        &self,
        session_id: &str,
        working_dir: Option<&Path>,
        uploader: &ReportUploader,
        cancel: &CancellationToken,
    ) -> Result<usize, DriverError> {
        let mut jobs_run = 0;
        while !cancel.is_cancelled() {
            let (now, next) = match self.api.poll_for_work(&self.config.worker_id, session_id).await? {
                PollResult::Run { now, next } => (now, next),
                PollResult::Stop => {
                    tracing::info!(session_id, jobs_run, "No more work");
                    break;
                }
            };

            let job = JobAssignment {
                node_id: now,
                next,
                working_dir: working_dir.map(Path::to_path_buf),
            };
            tracing::debug!(node_id = %job.node_id, next = ?job.next, "Running job");
            if let Err(e) = self.engine.run_job(&job, uploader).await {
                // Its missing reports show up as an incomplete job on the client.
                tracing::error!(node_id = %job.node_id, error = %e, "Job could not be run");
            }
            jobs_run += 1;
        }
        Ok(jobs_run)
    }

    /// Wait for every background submission. Returns the number that failed.
    async fn signal_done(&self, uploader: &ReportUploader) -> usize {
        uploader.join().await;
        let failed = uploader.failed();
        tracing::info!(
            worker_id = %self.config.worker_id,
            submitted = uploader.submitted(),
            failed,
            "Worker done"
        );
        failed
    }

    async fn upload_artifacts(&self, session_id: &str) -> Result<bool, DriverError> {
        let Some(dir) = &self.config.artifacts_dir else {
            return Ok(false);
        };
        let Some(bundle) = zip_dir(dir)? else {
            tracing::debug!(dir = %dir.display(), "No artifacts to upload");
            return Ok(false);
        };

        self.api
            .upload_artifact(session_id, &self.config.worker_id, &bundle)
            .await?;
        tracing::info!(session_id, size = bundle.len(), "Artifacts uploaded");
        Ok(true)
    }
}

/// Refresh liveness until cancelled. Failures are logged, never fatal.
async fn heartbeat_loop(
    api: DispatchApi,
    worker_id: String,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; the poll loop already counts as contact.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = api.heartbeat(&worker_id).await {
                    tracing::warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background report submission
// ---------------------------------------------------------------------------

/// Submits phase reports without blocking the engine.
///
/// Every [`emit`](ReportSink::emit) spawns a tracked task; at most
/// `max_in_flight` of them talk to the orchestrator at once.
pub struct ReportUploader {
    api: DispatchApi,
    session_id: Arc<str>,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    submitted: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl ReportUploader {
    pub fn new(api: DispatchApi, session_id: &str, max_in_flight: usize) -> Self {
        Self {
            api,
            session_id: Arc::from(session_id),
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            submitted: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Close the group and wait for every submission.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl ReportSink for ReportUploader {
    fn emit(&self, node_id: &str, phase: Phase, report: String) {
        let api = self.api.clone();
        let session_id = Arc::clone(&self.session_id);
        let permits = Arc::clone(&self.permits);
        let submitted = Arc::clone(&self.submitted);
        let failed = Arc::clone(&self.failed);
        let node_id = node_id.to_string();

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                failed.fetch_add(1, Ordering::SeqCst);
                return;
            };
            match api
                .submit_phase_report(&session_id, &node_id, phase, report)
                .await
            {
                Ok(()) => {
                    submitted.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::error!(
                        node_id = %node_id,
                        phase = %phase,
                        error = %e,
                        "Failed to submit phase report"
                    );
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
    }
}
