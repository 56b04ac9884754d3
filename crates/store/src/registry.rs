//! Orchestrator state shared by every request handler.
//!
//! Lock order is session -> workers. The session map lock is only held long
//! enough to clone a session handle, so requests for different sessions do
//! not contend.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hildist_core::error::CoreError;
use hildist_core::types::{NodeId, Phase, PollResult};
use hildist_core::worker_pool::{unmet_tags, validate_worker_id};
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::job::JobSpec;
use crate::models::session::SessionSummary;
use crate::models::worker::{UpdateWorker, Worker};
use crate::sessions::Session;
use crate::workers::WorkerRegistry;

type SessionHandle = Arc<Mutex<Session>>;

pub struct Registry {
    workers: RwLock<WorkerRegistry>,
    sessions: RwLock<IndexMap<String, SessionHandle>>,
}

impl Registry {
    pub fn new(worker_timeout: Duration) -> Self {
        Self {
            workers: RwLock::new(WorkerRegistry::new(worker_timeout)),
            sessions: RwLock::new(IndexMap::new()),
        }
    }

    async fn session(&self, session_id: &str) -> Result<SessionHandle, CoreError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| CoreError::session_not_found(session_id))
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    pub async fn create_session(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session::new(session_id.clone(), Utc::now());
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        tracing::info!(session_id = %session_id, "Session created");
        session_id
    }

    /// Stop a session and release its environment. Idempotent.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), CoreError> {
        let session = self.session(session_id).await?;
        if session.lock().await.stop() {
            tracing::info!(session_id, "Session stopped");
        }
        Ok(())
    }

    /// Drop a session together with its artifacts.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), CoreError> {
        self.sessions
            .write()
            .await
            .shift_remove(session_id)
            .ok_or_else(|| CoreError::session_not_found(session_id))?;
        tracing::info!(session_id, "Session deleted");
        Ok(())
    }

    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary, CoreError> {
        let session = self.session(session_id).await?;
        let summary = session.lock().await.summary();
        Ok(summary)
    }

    pub async fn upload_env(&self, session_id: &str, bytes: Vec<u8>) -> Result<(), CoreError> {
        let session = self.session(session_id).await?;
        let size = bytes.len();
        session.lock().await.set_env(bytes)?;
        tracing::info!(session_id, size, "Environment uploaded");
        Ok(())
    }

    pub async fn download_env(&self, session_id: &str) -> Result<Vec<u8>, CoreError> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;
        Ok(session.env()?.to_vec())
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Add jobs to a session, all or nothing.
    ///
    /// Rejected with `UnschedulableTags` when any requirement is not
    /// provided by an active worker.
    pub async fn submit_jobs(&self, session_id: &str, jobs: Vec<JobSpec>) -> Result<usize, CoreError> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.ensure_open()?;

        let now = Utc::now();
        {
            let workers = self.workers.read().await;
            let unprocessable = unmet_tags(
                jobs.iter().map(|job| &job.worker_requirements),
                &workers.active_tags(now),
            );
            if !unprocessable.is_empty() {
                tracing::warn!(
                    session_id,
                    tags = ?unprocessable,
                    "Rejected jobs with unprocessable tags"
                );
                return Err(CoreError::UnschedulableTags(unprocessable));
            }

            let untagged = jobs.iter().filter(|j| j.worker_requirements.is_empty()).count();
            if untagged > 0 && !workers.has_active_default(now) {
                tracing::warn!(
                    session_id,
                    untagged,
                    "Untagged jobs submitted but no default worker is active"
                );
            }
        }

        let count = session.upsert_jobs(jobs)?;
        tracing::info!(session_id, count, "Jobs submitted");
        Ok(count)
    }

    pub async fn fetch_statuses(
        &self,
        session_id: &str,
    ) -> Result<IndexMap<NodeId, Vec<Phase>>, CoreError> {
        let session = self.session(session_id).await?;
        let statuses = session.lock().await.statuses();
        Ok(statuses)
    }

    pub async fn submit_phase_report(
        &self,
        session_id: &str,
        node_id: &str,
        phase: Phase,
        report: String,
    ) -> Result<(), CoreError> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.submit_report(node_id, phase, report)?;
        tracing::debug!(session_id, node_id, %phase, "Phase report stored");
        if phase.is_terminal() && session.is_complete() {
            tracing::info!(session_id, "All jobs finished");
        }
        Ok(())
    }

    pub async fn fetch_phase_report(
        &self,
        session_id: &str,
        node_id: &str,
        phase: Phase,
    ) -> Result<String, CoreError> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;
        Ok(session.report(node_id, phase)?.to_string())
    }

    // ── Work assignment ──────────────────────────────────────────────────

    /// Hand the worker its next job, or tell it to stop.
    pub async fn poll_for_work(&self, session_id: &str, worker_id: &str) -> Result<PollResult, CoreError> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        if session.is_stopped() {
            return Ok(PollResult::Stop);
        }
        session.activate();

        let worker = {
            let mut workers = self.workers.write().await;
            workers.register_or_touch(worker_id, Utc::now());
            workers.get(worker_id)?.clone()
        };

        let result = session.assign_next(&worker);
        match &result {
            PollResult::Run { now, next } => {
                tracing::debug!(session_id, worker_id, node_id = %now, next = ?next, "Job assigned");
            }
            PollResult::Stop => {
                tracing::debug!(session_id, worker_id, "No compatible work left");
            }
        }
        Ok(result)
    }

    /// The oldest open session with work for this worker, if any.
    pub async fn resolve_worker_session(&self, worker_id: &str) -> Result<Option<String>, CoreError> {
        let tags = {
            let mut workers = self.workers.write().await;
            workers.register_or_touch(worker_id, Utc::now());
            workers.get(worker_id)?.tags.clone()
        };

        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            let session = handle.lock().await;
            if !session.is_stopped() && session.has_pending_for(&tags) {
                return Ok(Some(session.id().to_string()));
            }
        }
        Ok(None)
    }

    // ── Artifacts ────────────────────────────────────────────────────────

    pub async fn upload_artifact(
        &self,
        session_id: &str,
        worker_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), CoreError> {
        validate_worker_id(worker_id)?;
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        let size = bytes.len();
        session.upload_artifact(worker_id, bytes)?;
        // The id comes from the request body; it must not create a worker.
        let known = self.workers.write().await.touch(worker_id, Utc::now());
        tracing::info!(session_id, worker_id, size, known, "Artifact uploaded");
        Ok(())
    }

    pub async fn list_artifacts(&self, session_id: &str) -> Result<Vec<String>, CoreError> {
        let session = self.session(session_id).await?;
        let ids = session.lock().await.artifacts().list();
        Ok(ids)
    }

    pub async fn download_artifact(&self, session_id: &str, worker_id: &str) -> Result<Vec<u8>, CoreError> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;
        Ok(session.artifacts().download(worker_id)?.to_vec())
    }

    // ── Workers ──────────────────────────────────────────────────────────

    pub async fn register_or_touch(&self, worker_id: &str) -> Worker {
        self.workers
            .write()
            .await
            .register_or_touch(worker_id, Utc::now())
    }

    /// Refresh a worker's liveness; registers it if unseen.
    pub async fn heartbeat(&self, worker_id: &str) -> Worker {
        self.register_or_touch(worker_id).await
    }

    pub async fn update_worker(&self, worker_id: &str, input: &UpdateWorker) -> Result<Worker, CoreError> {
        self.workers
            .write()
            .await
            .update(worker_id, input, Utc::now())
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Worker, CoreError> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn active_workers(&self) -> Vec<Worker> {
        self.workers.read().await.active_workers(Utc::now())
    }

    pub async fn all_workers(&self) -> Vec<Worker> {
        self.workers.read().await.all()
    }
}
