//! Worker entity models and DTOs.

use std::time::Duration;

use hildist_core::pet_name::pet_name;
use hildist_core::types::{TagSet, Timestamp};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity structs
// ---------------------------------------------------------------------------

/// A worker machine known to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Worker {
    /// Stable hardware identity, usually a MAC address.
    pub worker_id: String,
    pub display_name: String,
    pub tags: TagSet,
    pub last_seen: Timestamp,
}

impl Worker {
    /// A freshly seen worker: no tags yet, generated display name.
    pub fn first_contact(worker_id: &str, now: Timestamp) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            display_name: pet_name(worker_id),
            tags: TagSet::new(),
            last_seen: now,
        }
    }

    /// A worker with no tags has never been configured and is not schedulable.
    pub fn is_configured(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Configured and seen within `timeout` of `now`.
    pub fn is_active(&self, now: Timestamp, timeout: Duration) -> bool {
        if !self.is_configured() {
            return false;
        }
        // A negative age (clock skew) fails to convert and counts as fresh.
        (now - self.last_seen)
            .to_std()
            .map(|age| age < timeout)
            .unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// Update DTOs
// ---------------------------------------------------------------------------

/// Configuration pushed by a worker or an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWorker {
    pub display_name: String,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Public description of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub display_name: String,
    pub tags: Vec<String>,
}

impl From<Worker> for WorkerInfo {
    fn from(worker: Worker) -> Self {
        Self {
            worker_id: worker.worker_id,
            display_name: worker.display_name,
            tags: worker.tags.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn first_contact_is_unconfigured() {
        let worker = Worker::first_contact("00:1a:2b:3c:4d:5e", Utc::now());
        assert!(!worker.is_configured());
        assert_eq!(worker.display_name, pet_name("00:1a:2b:3c:4d:5e"));
    }

    #[test]
    fn stale_worker_is_inactive() {
        let now = Utc::now();
        let mut worker = Worker::first_contact("w", now - chrono::Duration::seconds(300));
        worker.tags.insert("rig1".into());
        assert!(!worker.is_active(now, Duration::from_secs(120)));
        assert!(worker.is_active(now, Duration::from_secs(600)));
    }

    #[test]
    fn unconfigured_worker_is_never_active() {
        let now = Utc::now();
        let worker = Worker::first_contact("w", now);
        assert!(!worker.is_active(now, Duration::from_secs(120)));
    }
}
