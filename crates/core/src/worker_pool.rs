//! Worker pool constants, affinity rules and validation.
//!
//! Pure functions shared by the orchestrator, the in-process scheduler and
//! the drivers, so both scheduling strategies apply the same affinity rule.

use std::time::Duration;

use crate::error::CoreError;
use crate::types::TagSet;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// A worker that has not been seen for this long is excluded from scheduling.
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(120);

/// How often a worker driver refreshes its `last_seen` while running jobs.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Tag carried by the default worker, the only one that runs untagged jobs.
pub const DEFAULT_WORKER_TAG: &str = "local";

/// Maximum length of a worker display name.
const MAX_NAME_LEN: usize = 128;

/// Maximum number of tags a worker may have.
const MAX_TAGS: usize = 32;

/// Maximum length of a single tag.
const MAX_TAG_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Affinity
// ---------------------------------------------------------------------------

/// Whether a worker carrying `worker_tags` may run a job requiring `requirements`.
///
/// A job with requirements runs on any worker whose tags are a superset of
/// them. A job without requirements runs only on the default worker.
pub fn is_compatible(requirements: &TagSet, worker_tags: &TagSet) -> bool {
    if requirements.is_empty() {
        is_default_worker(worker_tags)
    } else {
        requirements.is_subset(worker_tags)
    }
}

/// Whether a worker is the distinguished default worker.
pub fn is_default_worker(worker_tags: &TagSet) -> bool {
    worker_tags.contains(DEFAULT_WORKER_TAG)
}

/// Tags required by `requirements` that are missing from `available`.
pub fn unmet_tags<'a>(
    requirements: impl IntoIterator<Item = &'a TagSet>,
    available: &TagSet,
) -> TagSet {
    requirements
        .into_iter()
        .flat_map(|tags| tags.iter())
        .filter(|tag| !available.contains(*tag))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A display name is shown to people next to the worker id, so any printable
/// text up to [`MAX_NAME_LEN`] characters is accepted.
pub fn validate_display_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(invalid("display_name is blank"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "display_name is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("display_name contains control characters"));
    }
    Ok(())
}

/// Tags are matched byte-for-byte against job requirements, and the CLI
/// reads them as a comma-separated list. A tag with whitespace or a comma
/// could never be required by a job, so it is rejected here instead of
/// silently making the worker unschedulable.
pub fn validate_tags(tags: &[String]) -> Result<(), CoreError> {
    if tags.len() > MAX_TAGS {
        return Err(invalid(format!("more than {MAX_TAGS} tags")));
    }

    let mut seen = TagSet::new();
    for tag in tags {
        if tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return Err(invalid(format!(
                "tag \"{tag}\" must be 1 to {MAX_TAG_LEN} bytes"
            )));
        }
        if tag.chars().any(|c| c.is_whitespace() || c.is_control() || c == ',') {
            return Err(invalid(format!(
                "tag \"{tag}\" contains whitespace or a comma"
            )));
        }
        if !seen.insert(tag.clone()) {
            return Err(invalid(format!("tag \"{tag}\" is listed twice")));
        }
    }
    Ok(())
}

/// Worker ids appear as a URL path segment and name the directory a worker's
/// artifacts are unpacked into, so they must be one plain path component.
pub fn validate_worker_id(worker_id: &str) -> Result<(), CoreError> {
    let plain = !worker_id.is_empty()
        && worker_id != "."
        && worker_id != ".."
        && !worker_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if !plain {
        return Err(invalid(format!(
            "worker_id \"{worker_id}\" must be a single path component"
        )));
    }
    Ok(())
}

pub fn validate_node_id(node_id: &str) -> Result<(), CoreError> {
    if node_id.trim().is_empty() {
        return Err(invalid("nodeid is blank"));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::Validation(message.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
