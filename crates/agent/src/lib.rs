//! Drivers for the two ends of a distributed run, plus the CLI that picks
//! between them.
//!
//! * [`client_driver`] owns the job collection: it submits jobs, follows
//!   phase reports and collects artifacts.
//! * [`worker_driver`] runs on a tagged machine: it pulls jobs, executes them
//!   and pushes reports back.
//! * [`local`] runs the same collection on in-process workers.

pub mod artifacts;
pub mod cli;
pub mod client_driver;
pub mod error;
pub mod local;
pub mod summary;
pub mod worker_driver;

pub use error::DriverError;
