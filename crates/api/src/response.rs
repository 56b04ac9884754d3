//! Shared response types for API handlers.

use serde::Serialize;

/// Plain `{ "message": ... }` acknowledgement.
///
/// Returned by endpoints whose only result is that the write happened.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    pub fn new(message: &'static str) -> Self {
        Self { message }
    }
}
