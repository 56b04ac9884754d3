//! A single dispatch session and its job state machine.
//!
//! A `Session` is always mutated under its own mutex (see
//! [`Registry`](crate::Registry)); nothing in here synchronises.

use std::collections::BTreeSet;

use hildist_core::error::CoreError;
use hildist_core::types::{JobStatus, NodeId, Phase, PollResult, SessionState, TagSet, Timestamp};
use hildist_core::worker_pool::{is_compatible, validate_node_id};
use indexmap::IndexMap;

use crate::artifacts::ArtifactStore;
use crate::models::job::{Job, JobSpec};
use crate::models::session::{JobCounts, SessionSummary};
use crate::models::worker::Worker;

#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    jobs: IndexMap<NodeId, Job>,
    env: Option<Vec<u8>>,
    artifacts: ArtifactStore,
    created_at: Timestamp,
}

impl Session {
    pub fn new(id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Setup,
            jobs: IndexMap::new(),
            env: None,
            artifacts: ArtifactStore::new(),
            created_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn is_stopped(&self) -> bool {
        self.state == SessionState::Stopped
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Move to `Stopped` and release the environment bundle.
    ///
    /// Returns `false` if the session was already stopped.
    pub fn stop(&mut self) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.state = SessionState::Stopped;
        self.env = None;
        true
    }

    /// `Setup -> Running` on the first worker poll.
    pub fn activate(&mut self) {
        if self.state == SessionState::Setup {
            self.state = SessionState::Running;
        }
    }

    /// Reject mutations on a stopped session.
    pub fn ensure_open(&self) -> Result<(), CoreError> {
        if self.is_stopped() {
            return Err(CoreError::SessionStopped(self.id.clone()));
        }
        Ok(())
    }

    // ── Environment bundle ───────────────────────────────────────────────

    pub fn set_env(&mut self, bytes: Vec<u8>) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.env = Some(bytes);
        Ok(())
    }

    pub fn env(&self) -> Result<&[u8], CoreError> {
        self.env.as_deref().ok_or_else(|| CoreError::NotFound {
            entity: "Environment",
            id: self.id.clone(),
        })
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Insert or reset jobs as `Pending`.
    ///
    /// New jobs are appended; resubmitted jobs keep their position and
    /// reports but lose their assignment. The batch is validated up front so
    /// a bad node id leaves the session untouched.
    pub fn upsert_jobs(&mut self, specs: Vec<JobSpec>) -> Result<usize, CoreError> {
        self.ensure_open()?;
        for spec in &specs {
            validate_node_id(&spec.node_id)?;
        }

        let count = specs.len();
        for spec in specs {
            match self.jobs.get_mut(&spec.node_id) {
                Some(job) => {
                    job.worker_requirements = spec.worker_requirements;
                    job.status = JobStatus::Pending;
                    job.assigned_worker = None;
                }
                None => {
                    self.jobs.insert(spec.node_id.clone(), Job::new(spec));
                }
            }
        }
        Ok(count)
    }

    pub fn job(&self, node_id: &str) -> Result<&Job, CoreError> {
        self.jobs
            .get(node_id)
            .ok_or_else(|| CoreError::job_not_found(node_id))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Present phases per job, in submission order.
    pub fn statuses(&self) -> IndexMap<NodeId, Vec<Phase>> {
        self.jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.present_phases()))
            .collect()
    }

    // ── Reports ──────────────────────────────────────────────────────────

    /// Store a write-once phase report. Teardown finishes the job.
    pub fn submit_report(&mut self, node_id: &str, phase: Phase, report: String) -> Result<(), CoreError> {
        self.ensure_open()?;
        let job = self
            .jobs
            .get_mut(node_id)
            .ok_or_else(|| CoreError::job_not_found(node_id))?;

        if job.reports.contains_key(&phase) {
            return Err(CoreError::DuplicatePhaseReport {
                node_id: node_id.to_string(),
                phase,
            });
        }
        job.reports.insert(phase, report);
        if phase.is_terminal() {
            job.status = JobStatus::Finished;
        }
        Ok(())
    }

    pub fn report(&self, node_id: &str, phase: Phase) -> Result<&str, CoreError> {
        let job = self.job(node_id)?;
        job.reports
            .get(&phase)
            .map(String::as_str)
            .ok_or_else(|| CoreError::NotFound {
                entity: "Report",
                id: format!("{node_id}/{phase}"),
            })
    }

    // ── Assignment ───────────────────────────────────────────────────────

    /// Claim the first pending job compatible with `worker`.
    ///
    /// The second compatible pending job is returned as a lookahead hint and
    /// stays `Pending`.
    pub fn assign_next(&mut self, worker: &Worker) -> PollResult {
        if self.is_stopped() {
            return PollResult::Stop;
        }

        let mut candidates = self
            .jobs
            .values_mut()
            .filter(|job| {
                job.status == JobStatus::Pending
                    && is_compatible(&job.worker_requirements, &worker.tags)
            });

        let Some(now) = candidates.next() else {
            return PollResult::Stop;
        };
        now.status = JobStatus::Running;
        now.assigned_worker = Some(worker.worker_id.clone());
        let now = now.node_id.clone();
        let next = candidates.next().map(|job| job.node_id.clone());

        PollResult::Run { now, next }
    }

    /// Whether a worker with `tags` would be handed a job right now.
    pub fn has_pending_for(&self, tags: &TagSet) -> bool {
        self.jobs.values().any(|job| {
            job.status == JobStatus::Pending && is_compatible(&job.worker_requirements, tags)
        })
    }

    /// Every job has a teardown report.
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(Job::has_teardown)
    }

    /// Jobs still waiting for their teardown report.
    pub fn missing_teardown(&self) -> Vec<NodeId> {
        self.jobs
            .values()
            .filter(|job| !job.has_teardown())
            .map(|job| job.node_id.clone())
            .collect()
    }

    // ── Artifacts ────────────────────────────────────────────────────────

    pub fn upload_artifact(&mut self, worker_id: &str, bytes: Vec<u8>) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.artifacts.upload(worker_id, bytes);
        Ok(())
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    // ── Diagnostics ──────────────────────────────────────────────────────

    pub fn summary(&self) -> SessionSummary {
        let mut jobs = JobCounts::default();
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Pending => jobs.pending += 1,
                JobStatus::Running => jobs.running += 1,
                JobStatus::Finished => jobs.finished += 1,
            }
        }
        let workers: BTreeSet<String> = self
            .jobs
            .values()
            .filter_map(|job| job.assigned_worker.clone())
            .collect();
        SessionSummary {
            session_id: self.id.clone(),
            state: self.state,
            jobs,
            workers: workers.into_iter().collect(),
            artifacts: self.artifacts.len(),
            created_at: self.created_at,
        }
    }
}
