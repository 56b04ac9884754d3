//! Client side of a distributed run.
//!
//! Owns the job collection: opens a session, submits the jobs, follows
//! phase reports until every job has torn down, then stops the session and
//! collects the workers' artifact bundles.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use tokio::time::Instant;

use hildist_client::{ClientError, DispatchApi};
use hildist_core::engine::ReportListener;
use hildist_core::types::{NodeId, Phase};
use hildist_core::worker_pool::validate_worker_id;
use hildist_store::models::job::JobSpec;

use crate::artifacts::unzip_into;
use crate::error::DriverError;

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait for workers' artifact bundles after the last report.
pub const DEFAULT_ARTIFACT_WAIT: Duration = Duration::from_secs(10);

/// Reports fetched concurrently per poll.
const REPORT_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct ClientDriverConfig {
    pub poll_interval: Duration,
    /// Give up on jobs without a teardown report after this long.
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Where worker bundles are unpacked, one subdirectory per worker.
    /// `None` skips artifact collection.
    pub artifacts_dir: Option<PathBuf>,
    /// Bound on waiting for every participating worker's bundle.
    pub artifact_wait: Duration,
    /// Environment bundle (a zip) made available to workers.
    pub env_bundle: Option<Vec<u8>>,
}

impl Default for ClientDriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            artifacts_dir: None,
            artifact_wait: DEFAULT_ARTIFACT_WAIT,
            env_bundle: None,
        }
    }
}

/// What a finished client run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRunOutcome {
    pub session_id: String,
    /// Worker ids whose bundles were unpacked.
    pub artifacts: Vec<String>,
}

pub struct ClientDriver {
    api: DispatchApi,
    config: ClientDriverConfig,
}

impl ClientDriver {
    pub fn new(api: DispatchApi, config: ClientDriverConfig) -> Self {
        Self { api, config }
    }

    /// Run `jobs` to completion, forwarding every phase report once.
    pub async fn run(
        &self,
        jobs: Vec<JobSpec>,
        listener: &mut dyn ReportListener,
    ) -> Result<ClientRunOutcome, DriverError> {
        let session_id = self.api.create_session().await?;
        tracing::info!(session_id = %session_id, jobs = jobs.len(), "Session created");

        if let Some(bundle) = &self.config.env_bundle {
            self.api.upload_env(&session_id, bundle.clone()).await?;
            tracing::info!(session_id = %session_id, size = bundle.len(), "Environment uploaded");
        }

        if let Err(e) = self.api.submit_jobs(&session_id, &jobs).await {
            if let ClientError::Api { tags, .. } = &e {
                if !tags.is_empty() {
                    tracing::error!(tags = ?tags, "No active worker provides these tags");
                }
            }
            self.api.stop_session(&session_id).await.ok();
            return Err(e.into());
        }

        let started = Instant::now();
        let mut seen: HashSet<(NodeId, Phase)> = HashSet::new();
        loop {
            let statuses = self.api.fetch_statuses(&session_id).await?;
            self.forward_new_reports(&session_id, &statuses, &mut seen, listener)
                .await?;

            let missing = missing_teardown(&statuses);
            if missing.is_empty() {
                tracing::info!(session_id = %session_id, "All jobs completed");
                break;
            }

            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    tracing::error!(
                        session_id = %session_id,
                        missing = missing.len(),
                        timeout_secs = timeout.as_secs(),
                        "Run timed out"
                    );
                    self.api.stop_session(&session_id).await?;
                    return Err(DriverError::Incomplete { missing });
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        let artifacts = match &self.config.artifacts_dir {
            Some(dir) => {
                self.wait_for_artifacts(&session_id).await?;
                self.api.stop_session(&session_id).await?;
                self.download_artifacts(&session_id, dir).await?
            }
            None => {
                self.api.stop_session(&session_id).await?;
                Vec::new()
            }
        };

        Ok(ClientRunOutcome {
            session_id,
            artifacts,
        })
    }

    /// Fetch and forward every report not forwarded before, in status order.
    async fn forward_new_reports(
        &self,
        session_id: &str,
        statuses: &IndexMap<NodeId, Vec<Phase>>,
        seen: &mut HashSet<(NodeId, Phase)>,
        listener: &mut dyn ReportListener,
    ) -> Result<(), DriverError> {
        let fresh = new_reports(statuses, seen);
        if fresh.is_empty() {
            return Ok(());
        }

        let reports: Vec<String> = stream::iter(fresh.iter())
            .map(|(node_id, phase)| self.api.fetch_phase_report(session_id, node_id, *phase))
            .buffered(REPORT_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        for ((node_id, phase), report) in fresh.into_iter().zip(reports) {
            listener.on_report(&node_id, phase, &report);
            seen.insert((node_id, phase));
        }
        Ok(())
    }

    /// Wait until every worker that ran a job has uploaded its bundle.
    ///
    /// Workers upload after their last report lands, so the bundle can trail
    /// completion. Workers with nothing to upload are waited for until
    /// `artifact_wait` expires.
    async fn wait_for_artifacts(&self, session_id: &str) -> Result<(), DriverError> {
        let deadline = Instant::now() + self.config.artifact_wait;
        let expected = self.api.session_summary(session_id).await?.workers;

        loop {
            let uploaded: HashSet<String> =
                self.api.list_artifacts(session_id).await?.into_iter().collect();
            let pending: Vec<&String> = expected.iter().filter(|w| !uploaded.contains(*w)).collect();
            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::info!(
                    session_id,
                    workers = ?pending,
                    "No artifact bundle from some workers"
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval.min(self.config.artifact_wait)).await;
        }
    }

    async fn download_artifacts(
        &self,
        session_id: &str,
        dir: &Path,
    ) -> Result<Vec<String>, DriverError> {
        let mut unpacked = Vec::new();
        for worker_id in self.api.list_artifacts(session_id).await? {
            let Some(dest) = artifact_dir(dir, &worker_id) else {
                tracing::warn!(session_id, worker_id = %worker_id, "Skipping bundle with unsafe worker id");
                continue;
            };
            let bundle = self.api.download_artifact(session_id, &worker_id).await?;
            unzip_into(&bundle, &dest)?;
            tracing::info!(
                session_id,
                worker_id = %worker_id,
                size = bundle.len(),
                "Artifacts unpacked"
            );
            unpacked.push(worker_id);
        }
        Ok(unpacked)
    }
}

/// Where a worker's bundle is unpacked: `<dir>/<worker_id>`, provided the id
/// is a single plain path component.
pub fn artifact_dir(dir: &Path, worker_id: &str) -> Option<PathBuf> {
    validate_worker_id(worker_id).ok()?;
    Some(dir.join(worker_id))
}

/// `(job, phase)` pairs present in `statuses` but not yet forwarded.
pub fn new_reports(
    statuses: &IndexMap<NodeId, Vec<Phase>>,
    seen: &HashSet<(NodeId, Phase)>,
) -> Vec<(NodeId, Phase)> {
    let mut fresh = Vec::new();
    for (node_id, phases) in statuses {
        for phase in phases {
            let key = (node_id.clone(), *phase);
            if !seen.contains(&key) {
                fresh.push(key);
            }
        }
    }
    fresh
}

/// Jobs without a teardown report, in submission order.
pub fn missing_teardown(statuses: &IndexMap<NodeId, Vec<Phase>>) -> Vec<NodeId> {
    statuses
        .iter()
        .filter(|(_, phases)| !phases.contains(&Phase::Teardown))
        .map(|(node_id, _)| node_id.clone())
        .collect()
}
