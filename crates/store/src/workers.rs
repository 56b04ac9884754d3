//! Process-wide worker registry.
//!
//! Workers appear on first contact and are never removed; staleness only
//! excludes them from scheduling. All methods take an explicit `now` so
//! liveness can be tested without sleeping.

use std::collections::HashMap;
use std::time::Duration;

use hildist_core::error::CoreError;
use hildist_core::types::{TagSet, Timestamp};
use hildist_core::worker_pool::{is_default_worker, validate_display_name, validate_tags};

use crate::models::worker::{UpdateWorker, Worker};

#[derive(Debug)]
pub struct WorkerRegistry {
    workers: HashMap<String, Worker>,
    timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Create an unseen worker, or refresh `last_seen` of a known one.
    ///
    /// Never touches tags or display name of a known worker.
    pub fn register_or_touch(&mut self, worker_id: &str, now: Timestamp) -> Worker {
        let worker = self
            .workers
            .entry(worker_id.to_string())
            .and_modify(|w| w.last_seen = now)
            .or_insert_with(|| {
                tracing::info!(worker_id, "New worker registered");
                Worker::first_contact(worker_id, now)
            });
        worker.clone()
    }

    /// Refresh `last_seen` of a known worker. Unseen ids are ignored.
    pub fn touch(&mut self, worker_id: &str, now: Timestamp) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(worker) => {
                worker.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Replace a known worker's display name and tags.
    pub fn update(
        &mut self,
        worker_id: &str,
        input: &UpdateWorker,
        now: Timestamp,
    ) -> Result<Worker, CoreError> {
        validate_display_name(&input.display_name)?;
        validate_tags(&input.tags)?;

        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::worker_not_found(worker_id))?;
        worker.display_name = input.display_name.clone();
        worker.tags = input.tags.iter().cloned().collect();
        worker.last_seen = now;

        tracing::info!(
            worker_id,
            display_name = %worker.display_name,
            tags = ?worker.tags,
            "Worker configuration updated"
        );
        Ok(worker.clone())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// A configured worker.
    ///
    /// Fails with `NotFound` if never seen and `WorkerUnconfigured` if it
    /// has no tags.
    pub fn get(&self, worker_id: &str) -> Result<&Worker, CoreError> {
        let worker = self
            .workers
            .get(worker_id)
            .ok_or_else(|| CoreError::worker_not_found(worker_id))?;
        if !worker.is_configured() {
            return Err(CoreError::WorkerUnconfigured(worker_id.to_string()));
        }
        Ok(worker)
    }

    /// Configured workers seen within the timeout, sorted by id.
    pub fn active_workers(&self, now: Timestamp) -> Vec<Worker> {
        let mut active: Vec<Worker> = self
            .workers
            .values()
            .filter(|w| w.is_active(now, self.timeout))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        active
    }

    /// Union of the tags of every active worker.
    pub fn active_tags(&self, now: Timestamp) -> TagSet {
        self.workers
            .values()
            .filter(|w| w.is_active(now, self.timeout))
            .flat_map(|w| w.tags.iter().cloned())
            .collect()
    }

    /// Whether an active worker can take untagged jobs.
    pub fn has_active_default(&self, now: Timestamp) -> bool {
        self.workers
            .values()
            .any(|w| w.is_active(now, self.timeout) && is_default_worker(&w.tags))
    }

    /// Every worker ever seen, sorted by id.
    pub fn all(&self) -> Vec<Worker> {
        let mut all: Vec<Worker> = self.workers.values().cloned().collect();
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn configure(registry: &mut WorkerRegistry, id: &str, tags: &[&str], now: Timestamp) {
        registry.register_or_touch(id, now);
        let input = UpdateWorker {
            display_name: format!("{id}-name"),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        };
        registry.update(id, &input, now).unwrap();
    }

    #[test]
    fn touch_keeps_configuration() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(Duration::from_secs(120));
        configure(&mut registry, "w1", &["rig1"], now);

        let later = now + chrono::Duration::seconds(10);
        let worker = registry.register_or_touch("w1", later);

        assert_eq!(worker.last_seen, later);
        assert_eq!(worker.display_name, "w1-name");
        assert!(worker.tags.contains("rig1"));
    }

    #[test]
    fn update_unknown_worker_is_not_found() {
        let mut registry = WorkerRegistry::new(Duration::from_secs(120));
        let input = UpdateWorker {
            display_name: "bench".into(),
            tags: vec!["rig1".into()],
        };
        assert_matches!(
            registry.update("ghost", &input, Utc::now()),
            Err(CoreError::NotFound { entity: "Worker", .. })
        );
    }

    #[test]
    fn update_rejects_invalid_tags() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(Duration::from_secs(120));
        registry.register_or_touch("w1", now);
        let input = UpdateWorker {
            display_name: "bench".into(),
            tags: vec!["rig1".into(), "rig1".into()],
        };
        assert_matches!(
            registry.update("w1", &input, now),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn touch_never_registers() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(Duration::from_secs(120));
        assert!(!registry.touch("ghost", now));
        assert!(registry.is_empty());

        registry.register_or_touch("w1", now - chrono::Duration::seconds(60));
        assert!(registry.touch("w1", now));
        assert_eq!(registry.all()[0].last_seen, now);
    }

    #[test]
    fn get_distinguishes_unknown_and_unconfigured() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(Duration::from_secs(120));
        registry.register_or_touch("w1", now);

        assert_matches!(registry.get("ghost"), Err(CoreError::NotFound { .. }));
        assert_matches!(registry.get("w1"), Err(CoreError::WorkerUnconfigured(id)) if id == "w1");
    }

    #[test]
    fn stale_workers_are_excluded() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(Duration::from_secs(120));
        configure(&mut registry, "old", &["rig9"], now - chrono::Duration::seconds(600));
        configure(&mut registry, "b", &["rig1"], now);
        configure(&mut registry, "a", &["local"], now);
        registry.register_or_touch("bare", now);

        let ids: Vec<String> = registry
            .active_workers(now)
            .into_iter()
            .map(|w| w.worker_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(!registry.active_tags(now).contains("rig9"));
        assert!(registry.has_active_default(now));
        assert_eq!(registry.all().len(), 4);
    }
}
