//! In-memory orchestrator state.
//!
//! Nothing here is persisted: sessions, their jobs and artifacts, and the
//! worker registry live for as long as the orchestrator process does.
//! [`Registry`] is the entry point used by the HTTP layer; the other modules
//! are the synchronous building blocks it locks around.

pub mod artifacts;
pub mod models;
pub mod registry;
pub mod sessions;
pub mod workers;

pub use registry::Registry;
