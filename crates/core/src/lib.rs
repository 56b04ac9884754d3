//! Domain building blocks shared by the orchestrator server, the drivers
//! and the in-process worker pool.
//!
//! This crate has no internal dependencies so every other crate in the
//! workspace can use it.

pub mod engine;
pub mod error;
pub mod pet_name;
pub mod report;
pub mod scheduling;
pub mod types;
pub mod worker_pool;
