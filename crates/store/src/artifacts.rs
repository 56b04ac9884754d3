//! Per-session artifact bundles, keyed by the worker that produced them.

use std::collections::BTreeMap;

use hildist_core::error::CoreError;

#[derive(Debug, Default)]
pub struct ArtifactStore {
    bundles: BTreeMap<String, Vec<u8>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a worker's bundle, replacing any earlier one.
    pub fn upload(&mut self, worker_id: &str, bytes: Vec<u8>) {
        self.bundles.insert(worker_id.to_string(), bytes);
    }

    /// Ids of the workers that uploaded a bundle, sorted.
    pub fn list(&self) -> Vec<String> {
        self.bundles.keys().cloned().collect()
    }

    pub fn download(&self, worker_id: &str) -> Result<&[u8], CoreError> {
        self.bundles
            .get(worker_id)
            .map(Vec::as_slice)
            .ok_or_else(|| CoreError::NotFound {
                entity: "Artifact",
                id: worker_id.to_string(),
            })
    }

    pub fn total_bytes(&self) -> usize {
        self.bundles.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
