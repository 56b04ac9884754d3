//! Command-line interface for `hildist-agent`.
//!
//! One binary, three modes:
//!
//! ```text
//! hildist-agent --jobs jobs.json                     client: submit and follow a run
//! hildist-agent --worker --worker-id bench-7 ...     worker: pull and execute jobs
//! hildist-agent --jobs jobs.json --local-worker a=rig1 --local-worker b=local
//!                                                    in-process pool, no server
//! ```
//!
//! Every flag can also be set from the environment (`HILDIST_*`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use hildist_core::worker_pool::validate_worker_id;
use hildist_store::models::job::JobSpec;
use hildist_worker::command::DEFAULT_PHASE_TIMEOUT;
use hildist_worker::{CommandEngine, LocalWorker};

use crate::client_driver::{ClientDriverConfig, DEFAULT_ARTIFACT_WAIT};
use crate::error::DriverError;
use crate::worker_driver::{WorkerDriverConfig, DEFAULT_MAX_IN_FLIGHT};

#[derive(Debug, Parser)]
#[command(name = "hildist-agent", version)]
#[command(about = "Distribute hardware-validation jobs across tagged worker machines")]
pub struct Cli {
    /// Orchestrator base URL
    #[arg(long, env = "HILDIST_SERVER_URL", default_value = "http://localhost:8000")]
    pub server_url: String,

    /// Run as a worker instead of a client
    #[arg(long, env = "HILDIST_WORKER")]
    pub worker: bool,

    /// Stable hardware identity of this worker
    #[arg(long, env = "HILDIST_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Join this session instead of discovering one
    #[arg(long, env = "HILDIST_SESSION_ID")]
    pub session_id: Option<String>,

    /// Capability tags pushed to the orchestrator (comma separated)
    #[arg(long, env = "HILDIST_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Human-readable worker name pushed with the tags
    #[arg(long, env = "HILDIST_DISPLAY_NAME")]
    pub display_name: Option<String>,

    /// JSON file with the jobs to run: `[{"nodeid": ..., "worker_requirements": [...]}]`
    #[arg(long, env = "HILDIST_JOBS")]
    pub jobs: Option<PathBuf>,

    /// Environment bundle (zip) made available to workers
    #[arg(long, env = "HILDIST_ENV")]
    pub env: Option<PathBuf>,

    /// Client: where worker bundles are unpacked. Worker: directory to upload
    #[arg(long, env = "HILDIST_ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Fail the run if jobs are still incomplete after this many seconds
    #[arg(long, env = "HILDIST_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Delay between polls, in milliseconds
    #[arg(long, env = "HILDIST_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Seconds to wait for worker artifact bundles once all jobs completed
    #[arg(long, env = "HILDIST_ARTIFACT_WAIT_SECS", default_value_t = DEFAULT_ARTIFACT_WAIT.as_secs())]
    pub artifact_wait_secs: u64,

    /// In-process worker `id=tag,tag`; repeat for more workers
    #[arg(long = "local-worker", value_name = "ID=TAGS")]
    pub local_workers: Vec<String>,

    /// Command run for every job phase: `<cmd> <phase> <nodeid>`
    #[arg(long, env = "HILDIST_RUN_COMMAND")]
    pub run_command: Option<String>,

    /// Directory jobs run in when the session carries no environment bundle
    #[arg(long, env = "HILDIST_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Wall-clock limit for a single phase, in seconds
    #[arg(long, env = "HILDIST_PHASE_TIMEOUT_SECS", default_value_t = DEFAULT_PHASE_TIMEOUT.as_secs())]
    pub phase_timeout_secs: u64,

    /// Concurrent phase-report submissions in worker mode
    #[arg(long, env = "HILDIST_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,
}

/// What the agent was asked to do.
#[derive(Debug)]
pub enum Mode {
    Client {
        jobs: PathBuf,
        config: ClientDriverConfig,
    },
    Worker(WorkerDriverConfig),
    Local {
        jobs: PathBuf,
        workers: Vec<LocalWorker>,
    },
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Resolve the flag combination into a mode.
    pub fn mode(&self) -> Result<Mode, DriverError> {
        if self.worker {
            if !self.local_workers.is_empty() {
                return Err(DriverError::Usage(
                    "--worker and --local-worker are mutually exclusive".into(),
                ));
            }
            let worker_id = self
                .worker_id
                .clone()
                .ok_or_else(|| DriverError::Usage("--worker needs --worker-id".into()))?;
            validate_worker_id(&worker_id).map_err(|e| DriverError::Usage(e.to_string()))?;

            let mut config = WorkerDriverConfig::new(worker_id);
            config.session_id = self.session_id.clone();
            config.display_name = self.display_name.clone();
            config.tags = self.tags.clone();
            config.poll_interval = self.poll_interval();
            config.artifacts_dir = self.artifacts_dir.clone();
            config.max_in_flight = self.max_in_flight;
            return Ok(Mode::Worker(config));
        }

        let jobs = self
            .jobs
            .clone()
            .ok_or_else(|| DriverError::Usage("--jobs is required unless --worker is set".into()))?;

        if !self.local_workers.is_empty() {
            let workers = self
                .local_workers
                .iter()
                .map(|spec| LocalWorker::parse(spec))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DriverError::Usage(e.to_string()))?;
            return Ok(Mode::Local { jobs, workers });
        }

        let env_bundle = match &self.env {
            Some(path) => Some(std::fs::read(path)?),
            None => None,
        };
        Ok(Mode::Client {
            jobs,
            config: ClientDriverConfig {
                poll_interval: self.poll_interval(),
                timeout: self.timeout_secs.map(Duration::from_secs),
                artifacts_dir: self.artifacts_dir.clone(),
                artifact_wait: Duration::from_secs(self.artifact_wait_secs),
                env_bundle,
            },
        })
    }

    /// The subprocess engine configured by `--run-command`.
    pub fn engine(&self, worker_id: Option<&str>) -> Result<CommandEngine, DriverError> {
        let line = self
            .run_command
            .as_deref()
            .ok_or_else(|| DriverError::Usage("--run-command is required to execute jobs".into()))?;
        let mut engine = CommandEngine::from_command_line(line)
            .map_err(|e| DriverError::Usage(e.to_string()))?
            .with_timeout(Duration::from_secs(self.phase_timeout_secs));
        if let Some(id) = worker_id {
            engine = engine.with_worker_id(id);
        }
        if let Some(dir) = &self.working_dir {
            engine = engine.with_working_dir(dir);
        }
        Ok(engine)
    }
}

/// Read a job list: a JSON array of `{nodeid, worker_requirements}`.
pub fn load_jobs(path: &Path) -> Result<Vec<JobSpec>, DriverError> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}
