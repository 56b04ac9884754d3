//! In-process heterogeneous load scheduling.
//!
//! Distributes a collection of jobs across workers that each support only a
//! subset of it, pushing bounded chunks to every worker instead of having
//! workers poll. The scheduler is a pure state machine: each method returns
//! the [`SchedulerCommand`]s the owning event loop must deliver.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::types::{NodeId, TagSet};
use crate::worker_pool::is_compatible;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// A worker whose last job took at least this long and that still has
/// enough queued work is considered busy and is not refilled.
pub const BUSY_THRESHOLD: Duration = Duration::from_millis(100);

/// Every worker keeps at least this many jobs queued so it always knows the
/// job that follows the current one.
const MIN_QUEUED: usize = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Instruction for the event loop driving the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Append these collection indices to the worker's queue.
    Send { worker: String, indices: Vec<usize> },
    /// The worker gets no more jobs: finish the queue, then exit.
    Shutdown { worker: String },
}

#[derive(Debug)]
struct WorkerSlot {
    tags: TagSet,
    collection: Option<Vec<NodeId>>,
    compatible: BTreeSet<usize>,
    queued: Vec<usize>,
    shutting_down: bool,
}

/// Affinity-aware chunked scheduler.
#[derive(Debug)]
pub struct HeterogeneousScheduler {
    requirements: HashMap<NodeId, TagSet>,
    workers: IndexMap<String, WorkerSlot>,
    collection: Option<Vec<NodeId>>,
    pending: Vec<usize>,
    max_chunk: Option<usize>,
}

impl HeterogeneousScheduler {
    /// Create a scheduler for jobs with the given requirements.
    ///
    /// Jobs missing from `requirements` are treated as untagged. `max_chunk`
    /// bounds a single send; it defaults to the collection size.
    pub fn new(requirements: HashMap<NodeId, TagSet>, max_chunk: Option<usize>) -> Self {
        Self {
            requirements,
            workers: IndexMap::new(),
            collection: None,
            pending: Vec::new(),
            max_chunk: max_chunk.map(|n| n.max(1)),
        }
    }

    /// Register a connected worker and its capability tags.
    pub fn add_worker(&mut self, worker: &str, tags: TagSet) -> Result<(), CoreError> {
        if self.workers.contains_key(worker) {
            return Err(CoreError::Validation(format!(
                "Worker {worker} is already registered"
            )));
        }
        self.workers.insert(
            worker.to_string(),
            WorkerSlot {
                tags,
                collection: None,
                compatible: BTreeSet::new(),
                queued: Vec::new(),
                shutting_down: false,
            },
        );
        Ok(())
    }

    /// Record the jobs a worker collected and derive which it can run.
    pub fn add_worker_collection(
        &mut self,
        worker: &str,
        collection: Vec<NodeId>,
    ) -> Result<(), CoreError> {
        let requirements = &self.requirements;
        let slot = self
            .workers
            .get_mut(worker)
            .ok_or_else(|| CoreError::worker_not_found(worker))?;

        let untagged = TagSet::new();
        slot.compatible = collection
            .iter()
            .enumerate()
            .filter(|(_, node_id)| {
                let required = requirements.get(*node_id).unwrap_or(&untagged);
                is_compatible(required, &slot.tags)
            })
            .map(|(index, _)| index)
            .collect();
        slot.collection = Some(collection);
        Ok(())
    }

    /// Whether every registered worker has reported its collection.
    pub fn collection_is_completed(&self) -> bool {
        !self.workers.is_empty() && self.workers.values().all(|w| w.collection.is_some())
    }

    /// Distribute work.
    ///
    /// The first call validates the collection and sends the initial chunks;
    /// later calls re-check every worker.
    pub fn schedule(&mut self) -> Result<Vec<SchedulerCommand>, CoreError> {
        if !self.collection_is_completed() {
            return Err(CoreError::Validation(
                "Not every worker has reported its collection".to_string(),
            ));
        }

        if self.collection.is_some() {
            let names: Vec<String> = self.workers.keys().cloned().collect();
            let mut commands = Vec::new();
            for name in names {
                commands.extend(self.check_schedule(&name, Duration::ZERO));
            }
            return Ok(commands);
        }

        let collection = self.common_collection()?;
        self.check_collection(&collection)?;

        self.pending = (0..collection.len()).collect();
        let max_chunk = *self.max_chunk.get_or_insert(collection.len().max(1));
        self.collection = Some(collection);

        if self.pending.is_empty() {
            return Ok(self.shutdown_all());
        }

        let num_workers = self.workers.len();
        let names: Vec<String> = self.workers.keys().cloned().collect();
        let mut commands = Vec::new();

        for name in &names {
            let compatible = self.workers[name].compatible.len();
            if compatible == 0 {
                commands.push(self.shutdown(name));
                continue;
            }

            let items_per_worker = compatible / num_workers;
            let chunk = (items_per_worker / 4).max(MIN_QUEUED).min(max_chunk);

            match self.send_jobs(name, chunk) {
                Some(command) => commands.push(command),
                // Everything it could run was already handed to others.
                None => commands.push(self.shutdown(name)),
            }
        }

        if self.pending.is_empty() {
            commands.extend(self.shutdown_all());
        }

        tracing::debug!(
            pending = self.pending.len(),
            workers = num_workers,
            "Initial schedule sent"
        );
        Ok(commands)
    }

    /// Record that `worker` finished the job at `index` and refill queues.
    pub fn mark_complete(
        &mut self,
        worker: &str,
        index: usize,
        duration: Duration,
    ) -> Result<Vec<SchedulerCommand>, CoreError> {
        let slot = self
            .workers
            .get_mut(worker)
            .ok_or_else(|| CoreError::worker_not_found(worker))?;
        let Some(position) = slot.queued.iter().position(|&i| i == index) else {
            return Err(CoreError::Validation(format!(
                "Job index {index} is not queued on worker {worker}"
            )));
        };
        slot.queued.remove(position);

        let mut commands = self.check_schedule(worker, duration);

        // Idle workers have no completion of their own to trigger a check.
        let idle: Vec<String> = self
            .workers
            .iter()
            .filter(|(name, slot)| {
                name.as_str() != worker && !slot.shutting_down && slot.queued.is_empty()
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in idle {
            commands.extend(self.check_schedule(&name, Duration::ZERO));
        }

        Ok(commands)
    }

    /// Whether every job has been handed out and completed.
    pub fn tests_finished(&self) -> bool {
        self.collection.is_some()
            && self.pending.is_empty()
            && self.workers.values().all(|w| w.queued.is_empty())
    }

    /// Number of jobs not yet handed to any worker.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Jobs queued on a worker, oldest first.
    pub fn queued(&self, worker: &str) -> &[usize] {
        self.workers
            .get(worker)
            .map(|w| w.queued.as_slice())
            .unwrap_or(&[])
    }

    /// Node id of a collection index.
    pub fn node_id(&self, index: usize) -> Option<&str> {
        self.collection
            .as_ref()
            .and_then(|c| c.get(index))
            .map(String::as_str)
    }

    // ---- private helpers ----

    /// Refill or shut down a single worker.
    fn check_schedule(&mut self, worker: &str, duration: Duration) -> Vec<SchedulerCommand> {
        let Some(slot) = self.workers.get(worker) else {
            return Vec::new();
        };
        if slot.shutting_down {
            return Vec::new();
        }
        let queued = slot.queued.len();

        if self.pending.is_empty() {
            return vec![self.shutdown(worker)];
        }

        let compatible_pending = self.compatible_pending(worker).len();
        if compatible_pending == 0 {
            return vec![self.shutdown(worker)];
        }

        let num_workers = self
            .workers
            .values()
            .filter(|w| !w.compatible.is_empty())
            .count()
            .max(1);
        let per_worker = compatible_pending / num_workers;
        let min_queued = (per_worker / 4).max(MIN_QUEUED);
        let max_queued = (per_worker / 2).max(MIN_QUEUED);

        if queued >= min_queued {
            return Vec::new();
        }
        if duration >= BUSY_THRESHOLD && queued >= MIN_QUEUED {
            return Vec::new();
        }

        let num_send = max_queued - queued;
        let chunk = MIN_QUEUED
            .saturating_sub(queued)
            .max(self.max_chunk.unwrap_or(usize::MAX));
        self.send_jobs(worker, num_send.min(chunk))
            .into_iter()
            .collect()
    }

    fn compatible_pending(&self, worker: &str) -> Vec<usize> {
        match self.workers.get(worker) {
            Some(slot) => self
                .pending
                .iter()
                .filter(|i| slot.compatible.contains(i))
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    fn send_jobs(&mut self, worker: &str, num: usize) -> Option<SchedulerCommand> {
        let selected: Vec<usize> = self
            .compatible_pending(worker)
            .into_iter()
            .take(num)
            .collect();
        if selected.is_empty() {
            return None;
        }

        self.pending.retain(|i| !selected.contains(i));
        if let Some(slot) = self.workers.get_mut(worker) {
            slot.queued.extend(&selected);
        }

        Some(SchedulerCommand::Send {
            worker: worker.to_string(),
            indices: selected,
        })
    }

    fn shutdown(&mut self, worker: &str) -> SchedulerCommand {
        if let Some(slot) = self.workers.get_mut(worker) {
            slot.shutting_down = true;
        }
        SchedulerCommand::Shutdown {
            worker: worker.to_string(),
        }
    }

    fn shutdown_all(&mut self) -> Vec<SchedulerCommand> {
        let names: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, slot)| !slot.shutting_down)
            .map(|(name, _)| name.clone())
            .collect();
        names.iter().map(|name| self.shutdown(name)).collect()
    }

    /// All workers must have collected the same jobs in the same order.
    fn common_collection(&self) -> Result<Vec<NodeId>, CoreError> {
        let mut collections = self
            .workers
            .iter()
            .filter_map(|(name, slot)| slot.collection.as_ref().map(|c| (name, c)));

        let Some((first_name, first)) = collections.next() else {
            return Ok(Vec::new());
        };
        for (name, collection) in collections {
            if collection != first {
                return Err(CoreError::CollectionMismatch(format!(
                    "{name} collected {} jobs, {first_name} collected {}",
                    collection.len(),
                    first.len()
                )));
            }
        }
        Ok(first.clone())
    }

    /// Every job must be runnable by at least one connected worker.
    fn check_collection(&self, collection: &[NodeId]) -> Result<(), CoreError> {
        for (index, node_id) in collection.iter().enumerate() {
            if !self.workers.values().any(|w| w.compatible.contains(&index)) {
                return Err(CoreError::UnschedulableJob {
                    node_id: node_id.clone(),
                    requirements: self.requirements.get(node_id).cloned().unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn tags(items: &[&str]) -> TagSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Build a scheduler where every worker collected `jobs` in order.
    fn scheduler(jobs: &[(&str, &[&str])], workers: &[(&str, &[&str])]) -> HeterogeneousScheduler {
        let requirements = jobs
            .iter()
            .map(|(id, reqs)| (id.to_string(), tags(reqs)))
            .collect();
        let collection: Vec<NodeId> = jobs.iter().map(|(id, _)| id.to_string()).collect();

        let mut sched = HeterogeneousScheduler::new(requirements, None);
        for (name, worker_tags) in workers {
            sched.add_worker(name, tags(worker_tags)).unwrap();
            sched.add_worker_collection(name, collection.clone()).unwrap();
        }
        sched
    }

    fn send(worker: &str, indices: &[usize]) -> SchedulerCommand {
        SchedulerCommand::Send {
            worker: worker.to_string(),
            indices: indices.to_vec(),
        }
    }

    fn shutdown(worker: &str) -> SchedulerCommand {
        SchedulerCommand::Shutdown {
            worker: worker.to_string(),
        }
    }

    fn rig_jobs(count: usize) -> Vec<(String, Vec<&'static str>)> {
        (0..count).map(|i| (format!("t::{i}"), vec!["rig1"])).collect()
    }

    fn as_refs<'a>(jobs: &'a [(String, Vec<&'static str>)]) -> Vec<(&'a str, &'a [&'a str])> {
        jobs.iter().map(|(id, t)| (id.as_str(), t.as_slice())).collect()
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn unschedulable_job_is_named() {
        let mut sched = scheduler(
            &[("a", &["rig1"]), ("b", &["rig9"])],
            &[("bench", &["rig1"])],
        );
        let err = sched.schedule().unwrap_err();
        assert_matches!(
            err,
            CoreError::UnschedulableJob { node_id, requirements }
                if node_id == "b" && requirements == tags(&["rig9"])
        );
    }

    #[test]
    fn untagged_job_needs_default_worker() {
        let mut sched = scheduler(&[("a", &[])], &[("bench", &["rig1"])]);
        assert_matches!(sched.schedule(), Err(CoreError::UnschedulableJob { .. }));

        let mut sched = scheduler(&[("a", &[])], &[("local", &["local"])]);
        assert!(sched.schedule().is_ok());
    }

    #[test]
    fn differing_collections_abort() {
        let mut sched = HeterogeneousScheduler::new(HashMap::new(), None);
        sched.add_worker("a", tags(&["local"])).unwrap();
        sched.add_worker("b", tags(&["local"])).unwrap();
        sched.add_worker_collection("a", vec!["x".into()]).unwrap();
        sched
            .add_worker_collection("b", vec!["x".into(), "y".into()])
            .unwrap();
        assert_matches!(sched.schedule(), Err(CoreError::CollectionMismatch(_)));
    }

    #[test]
    fn schedule_requires_all_collections() {
        let mut sched = HeterogeneousScheduler::new(HashMap::new(), None);
        sched.add_worker("a", tags(&["local"])).unwrap();
        assert_matches!(sched.schedule(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn duplicate_worker_rejected() {
        let mut sched = HeterogeneousScheduler::new(HashMap::new(), None);
        sched.add_worker("a", tags(&["local"])).unwrap();
        assert!(sched.add_worker("a", tags(&["rig1"])).is_err());
    }

    // -- initial distribution -------------------------------------------------

    #[test]
    fn initial_chunks_are_at_least_two() {
        let jobs = rig_jobs(10);
        let mut sched = scheduler(
            &as_refs(&jobs),
            &[("rig-a", &["rig1"]), ("rig-b", &["rig1"])],
        );

        let commands = sched.schedule().unwrap();

        assert_eq!(commands, vec![send("rig-a", &[0, 1]), send("rig-b", &[2, 3])]);
        assert_eq!(sched.pending_len(), 6);
    }

    #[test]
    fn jobs_only_go_to_compatible_workers() {
        let mut sched = scheduler(
            &[("a", &["rig1"]), ("b", &[]), ("c", &["rig1"])],
            &[("local", &["local"]), ("rig", &["rig1"])],
        );

        let commands = sched.schedule().unwrap();

        assert_eq!(
            commands,
            vec![
                send("local", &[1]),
                send("rig", &[0, 2]),
                shutdown("local"),
                shutdown("rig"),
            ]
        );
    }

    #[test]
    fn worker_without_compatible_jobs_is_shut_down() {
        let mut sched = scheduler(
            &[("a", &["rig1"]), ("b", &["rig1"])],
            &[("local", &["local"]), ("rig", &["rig1"])],
        );

        let commands = sched.schedule().unwrap();

        assert_eq!(
            commands,
            vec![shutdown("local"), send("rig", &[0, 1]), shutdown("rig")]
        );
    }

    #[test]
    fn empty_collection_shuts_everyone_down() {
        let mut sched = scheduler(&[], &[("rig", &["rig1"])]);
        assert_eq!(sched.schedule().unwrap(), vec![shutdown("rig")]);
    }

    // -- refilling ------------------------------------------------------------

    #[test]
    fn completion_refills_short_queue() {
        let jobs = rig_jobs(10);
        let mut sched = scheduler(
            &as_refs(&jobs),
            &[("rig-a", &["rig1"]), ("rig-b", &["rig1"])],
        );
        sched.schedule().unwrap();

        let commands = sched.mark_complete("rig-a", 0, Duration::ZERO).unwrap();

        assert_eq!(commands, vec![send("rig-a", &[4])]);
        assert_eq!(sched.queued("rig-a"), &[1, 4]);
    }

    #[test]
    fn busy_worker_is_not_refilled() {
        let jobs = rig_jobs(40);
        let mut sched = scheduler(&as_refs(&jobs), &[("rig", &["rig1"])]);
        assert_eq!(sched.schedule().unwrap(), vec![send("rig", &(0..10).collect::<Vec<_>>())]);

        for index in 0..3 {
            assert!(sched.mark_complete("rig", index, Duration::ZERO).unwrap().is_empty());
        }

        let commands = sched
            .mark_complete("rig", 3, Duration::from_millis(200))
            .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn quick_worker_is_refilled_to_upper_band() {
        let jobs = rig_jobs(40);
        let mut sched = scheduler(&as_refs(&jobs), &[("rig", &["rig1"])]);
        sched.schedule().unwrap();

        for index in 0..3 {
            sched.mark_complete("rig", index, Duration::ZERO).unwrap();
        }
        let commands = sched.mark_complete("rig", 3, Duration::ZERO).unwrap();

        assert_eq!(commands, vec![send("rig", &(10..19).collect::<Vec<_>>())]);
        assert_eq!(sched.pending_len(), 21);
    }

    #[test]
    fn finishing_everything_marks_tests_finished() {
        let mut sched = scheduler(&[("a", &["rig1"]), ("b", &["rig1"])], &[("rig", &["rig1"])]);
        assert_eq!(
            sched.schedule().unwrap(),
            vec![send("rig", &[0, 1]), shutdown("rig")]
        );
        assert!(!sched.tests_finished());

        assert!(sched.mark_complete("rig", 0, Duration::ZERO).unwrap().is_empty());
        assert!(sched.mark_complete("rig", 1, Duration::ZERO).unwrap().is_empty());
        assert!(sched.tests_finished());
        assert_eq!(sched.node_id(1), Some("b"));
    }

    #[test]
    fn completing_unqueued_job_is_rejected() {
        let mut sched = scheduler(&[("a", &["rig1"])], &[("rig", &["rig1"])]);
        sched.schedule().unwrap();
        assert_matches!(
            sched.mark_complete("rig", 7, Duration::ZERO),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            sched.mark_complete("ghost", 0, Duration::ZERO),
            Err(CoreError::NotFound { entity: "Worker", .. })
        );
    }
}
