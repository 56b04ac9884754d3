//! Typed HTTP client for the Dispatch Protocol.
//!
//! Used by both drivers: the client side creates sessions, submits jobs and
//! collects reports; the worker side polls for work and uploads reports and
//! artifacts.

pub mod api;
pub mod error;
pub mod retry;

pub use api::DispatchApi;
pub use error::ClientError;
pub use retry::RetryPolicy;
