//! In-process worker pool driven by [`HeterogeneousScheduler`].
//!
//! One task per worker pops jobs from its queue and runs them through the
//! shared engine. Workers never poll: the event loop pushes chunks as
//! [`SchedulerCommand`]s arrive and feeds completions back into the
//! scheduler. Reports reach the listener on the loop's own task, so the
//! listener needs no synchronisation.
//!
//! ```text
//!   schedule() ──Send/Shutdown──► worker task ──run_job──► engine
//!        ▲                              │
//!        └──── mark_complete() ◄── Completed / Report events
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use hildist_core::engine::{ExecutionEngine, JobAssignment, ReportListener, ReportSink};
use hildist_core::error::CoreError;
use hildist_core::scheduling::{HeterogeneousScheduler, SchedulerCommand};
use hildist_core::types::{NodeId, Phase, TagSet};
use hildist_store::models::job::JobSpec;

/// A worker simulated inside this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWorker {
    pub id: String,
    pub tags: TagSet,
}

impl LocalWorker {
    pub fn new(id: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            id: id.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Parse `id=tag,tag` (tags optional).
    pub fn parse(spec: &str) -> Result<Self, CoreError> {
        let (id, tags) = spec.split_once('=').unwrap_or((spec, ""));
        let id = id.trim();
        if id.is_empty() {
            return Err(CoreError::Validation(format!(
                "Local worker spec has no id: {spec:?}"
            )));
        }
        Ok(Self {
            id: id.to_string(),
            tags: tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

/// Result of a pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Jobs the engine ran to completion, in completion order.
    pub completed: Vec<NodeId>,
    /// Jobs that never finished, in submission order.
    pub incomplete: Vec<NodeId>,
}

impl PoolOutcome {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Local pool has no workers")]
    NoWorkers,

    #[error(transparent)]
    Scheduler(#[from] CoreError),
}

/// Message from the event loop to one worker task.
#[derive(Debug)]
enum WorkerMessage {
    Jobs(Vec<(usize, NodeId)>),
    Shutdown,
}

/// Message from a worker task to the event loop.
#[derive(Debug)]
enum PoolEvent {
    Report {
        node_id: NodeId,
        phase: Phase,
        report: String,
    },
    Completed {
        worker: String,
        index: usize,
        node_id: NodeId,
        duration: Duration,
        ok: bool,
    },
    Finished {
        worker: String,
    },
}

/// Forwards engine reports to the event loop without blocking.
struct ChannelSink {
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl ReportSink for ChannelSink {
    fn emit(&self, node_id: &str, phase: Phase, report: String) {
        let _ = self.events.send(PoolEvent::Report {
            node_id: node_id.to_string(),
            phase,
            report,
        });
    }
}

/// Runs a job collection on in-process workers.
pub struct LocalPool {
    workers: Vec<LocalWorker>,
    engine: Arc<dyn ExecutionEngine>,
    max_chunk: Option<usize>,
}

impl LocalPool {
    pub fn new(workers: Vec<LocalWorker>, engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            workers,
            engine,
            max_chunk: None,
        }
    }

    /// Bound the number of jobs sent to a worker at once.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    /// Run every job and forward its reports to `listener`.
    ///
    /// Fails before anything runs if a job is compatible with no worker.
    pub async fn run(
        &self,
        jobs: Vec<JobSpec>,
        listener: &mut dyn ReportListener,
    ) -> Result<PoolOutcome, PoolError> {
        if self.workers.is_empty() {
            return Err(PoolError::NoWorkers);
        }

        let collection: Vec<NodeId> = jobs.iter().map(|j| j.node_id.clone()).collect();
        let requirements: HashMap<NodeId, TagSet> = jobs
            .into_iter()
            .map(|j| (j.node_id, j.worker_requirements))
            .collect();

        let mut scheduler = HeterogeneousScheduler::new(requirements, self.max_chunk);
        for worker in &self.workers {
            scheduler.add_worker(&worker.id, worker.tags.clone())?;
            scheduler.add_worker_collection(&worker.id, collection.clone())?;
        }
        let initial = scheduler.schedule()?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut senders = HashMap::new();
        let mut tasks = JoinSet::new();
        for worker in &self.workers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(worker.id.clone(), tx);
            tasks.spawn(worker_loop(
                worker.id.clone(),
                Arc::clone(&self.engine),
                rx,
                events_tx.clone(),
            ));
        }
        // Only worker tasks hold senders now: the loop ends if they all die.
        drop(events_tx);

        dispatch(&scheduler, &senders, initial);
        tracing::info!(
            workers = self.workers.len(),
            jobs = collection.len(),
            "Local pool started"
        );

        let mut completed = Vec::new();
        let mut running = self.workers.len();
        while running > 0 {
            let Some(event) = events_rx.recv().await else {
                break;
            };
            match event {
                PoolEvent::Report {
                    node_id,
                    phase,
                    report,
                } => listener.on_report(&node_id, phase, &report),
                PoolEvent::Completed {
                    worker,
                    index,
                    node_id,
                    duration,
                    ok,
                } => {
                    if ok {
                        completed.push(node_id);
                    }
                    let commands = scheduler.mark_complete(&worker, index, duration)?;
                    dispatch(&scheduler, &senders, commands);
                }
                PoolEvent::Finished { worker } => {
                    tracing::debug!(worker = %worker, "Local worker finished");
                    running -= 1;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Local worker task failed");
            }
        }

        let done: HashSet<&NodeId> = completed.iter().collect();
        let incomplete = collection
            .iter()
            .filter(|id| !done.contains(id))
            .cloned()
            .collect();

        Ok(PoolOutcome {
            completed,
            incomplete,
        })
    }
}

/// Deliver scheduler commands to the worker tasks.
fn dispatch(
    scheduler: &HeterogeneousScheduler,
    senders: &HashMap<String, mpsc::UnboundedSender<WorkerMessage>>,
    commands: Vec<SchedulerCommand>,
) {
    for command in commands {
        let (worker, message) = match command {
            SchedulerCommand::Send { worker, indices } => {
                let jobs = indices
                    .into_iter()
                    .filter_map(|i| scheduler.node_id(i).map(|id| (i, id.to_string())))
                    .collect();
                (worker, WorkerMessage::Jobs(jobs))
            }
            SchedulerCommand::Shutdown { worker } => (worker, WorkerMessage::Shutdown),
        };
        let delivered = senders
            .get(&worker)
            .is_some_and(|tx| tx.send(message).is_ok());
        if !delivered {
            tracing::warn!(worker = %worker, "Local worker is gone, command dropped");
        }
    }
}

/// One worker: run queued jobs in order, with the next queued job as lookahead.
async fn worker_loop(
    worker: String,
    engine: Arc<dyn ExecutionEngine>,
    mut commands: mpsc::UnboundedReceiver<WorkerMessage>,
    events: mpsc::UnboundedSender<PoolEvent>,
) {
    let sink = ChannelSink {
        events: events.clone(),
    };
    let mut queue: VecDeque<(usize, NodeId)> = VecDeque::new();
    let mut shutting_down = false;

    loop {
        // Take everything already delivered so the lookahead is current.
        while let Ok(message) = commands.try_recv() {
            apply(message, &mut queue, &mut shutting_down);
        }

        let Some((index, node_id)) = queue.pop_front() else {
            if shutting_down {
                break;
            }
            match commands.recv().await {
                Some(message) => {
                    apply(message, &mut queue, &mut shutting_down);
                    continue;
                }
                None => break,
            }
        };

        let job = JobAssignment {
            node_id,
            next: queue.front().map(|(_, id)| id.clone()),
            working_dir: None,
        };
        let start = Instant::now();
        let result = engine.run_job(&job, &sink).await;
        if let Err(e) = &result {
            tracing::warn!(worker = %worker, node_id = %job.node_id, error = %e, "Job failed to run");
        }

        let _ = events.send(PoolEvent::Completed {
            worker: worker.clone(),
            index,
            node_id: job.node_id,
            duration: start.elapsed(),
            ok: result.is_ok(),
        });
    }

    let _ = events.send(PoolEvent::Finished { worker });
}

fn apply(message: WorkerMessage, queue: &mut VecDeque<(usize, NodeId)>, shutting_down: &mut bool) {
    match message {
        WorkerMessage::Jobs(jobs) => queue.extend(jobs),
        WorkerMessage::Shutdown => *shutting_down = true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use hildist_core::engine::EngineError;

    use super::*;

    /// Emits all three phases and records which worker ran what.
    #[derive(Default)]
    struct FakeEngine {
        runs: Mutex<Vec<JobAssignment>>,
        broken: Option<NodeId>,
    }

    #[async_trait]
    impl ExecutionEngine for FakeEngine {
        async fn run_job(&self, job: &JobAssignment, sink: &dyn ReportSink) -> Result<(), EngineError> {
            self.runs.lock().unwrap().push(job.clone());
            if self.broken.as_deref() == Some(job.node_id.as_str()) {
                return Err(EngineError::UnknownJob(job.node_id.clone()));
            }
            for phase in Phase::ALL {
                sink.emit(&job.node_id, phase, format!("{phase}:{}", job.node_id));
            }
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<(NodeId, Phase)>);

    impl ReportListener for Recorder {
        fn on_report(&mut self, node_id: &str, phase: Phase, _report: &str) {
            self.0.push((node_id.to_string(), phase));
        }
    }

    #[test]
    fn parses_worker_specs() {
        let worker = LocalWorker::parse("bench-7=rig1, scope").unwrap();
        assert_eq!(worker, LocalWorker::new("bench-7", &["rig1", "scope"]));
        assert!(LocalWorker::parse("plain").unwrap().tags.is_empty());
        assert!(LocalWorker::parse("=rig1").is_err());
    }

    #[tokio::test]
    async fn runs_every_job_on_a_compatible_worker() {
        let engine = Arc::new(FakeEngine::default());
        let pool = LocalPool::new(
            vec![
                LocalWorker::new("rig", &["rig1"]),
                LocalWorker::new("desk", &["local"]),
            ],
            engine.clone(),
        );
        let mut jobs: Vec<JobSpec> = (0..6)
            .map(|i| JobSpec::new(format!("rig::{i}"), &["rig1"]))
            .collect();
        jobs.extend((0..4).map(|i| JobSpec::new(format!("plain::{i}"), &[])));

        let mut recorder = Recorder::default();
        let outcome = pool.run(jobs, &mut recorder).await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.completed.len(), 10);
        assert_eq!(recorder.0.len(), 30);

        let runs = engine.runs.lock().unwrap();
        assert_eq!(runs.len(), 10);
        assert!(runs.iter().any(|job| job.next.is_some()));
    }

    #[tokio::test]
    async fn unschedulable_job_fails_before_running() {
        let engine = Arc::new(FakeEngine::default());
        let pool = LocalPool::new(vec![LocalWorker::new("rig", &["rig1"])], engine.clone());

        let result = pool
            .run(vec![JobSpec::new("a", &["rig9"])], &mut Recorder::default())
            .await;

        assert_matches!(
            result,
            Err(PoolError::Scheduler(CoreError::UnschedulableJob { node_id, .. })) if node_id == "a"
        );
        assert!(engine.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_leaves_job_incomplete() {
        let engine = Arc::new(FakeEngine {
            broken: Some("b".into()),
            ..FakeEngine::default()
        });
        let pool = LocalPool::new(vec![LocalWorker::new("rig", &["rig1"])], engine);
        let jobs = vec![
            JobSpec::new("a", &["rig1"]),
            JobSpec::new("b", &["rig1"]),
            JobSpec::new("c", &["rig1"]),
        ];

        let outcome = pool.run(jobs, &mut Recorder::default()).await.unwrap();

        assert_eq!(outcome.completed, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(outcome.incomplete, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn empty_collection_finishes_immediately() {
        let pool = LocalPool::new(
            vec![LocalWorker::new("rig", &["rig1"])],
            Arc::new(FakeEngine::default()),
        );
        let outcome = pool.run(Vec::new(), &mut Recorder::default()).await.unwrap();
        assert_eq!(outcome, PoolOutcome::default());
    }

    #[tokio::test]
    async fn pool_without_workers_is_rejected() {
        let pool = LocalPool::new(Vec::new(), Arc::new(FakeEngine::default()));
        let result = pool.run(Vec::new(), &mut Recorder::default()).await;
        assert_matches!(result, Err(PoolError::NoWorkers));
    }
}
