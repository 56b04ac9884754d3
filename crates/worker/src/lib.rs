//! Job execution on worker machines.
//!
//! [`CommandEngine`] runs each job phase as a subprocess; [`LocalPool`]
//! drives a set of in-process workers through the heterogeneous scheduler
//! without an orchestrator.

pub mod command;
pub mod pool;

pub use command::CommandEngine;
pub use pool::{LocalPool, LocalWorker, PoolError, PoolOutcome};
