//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - The in-memory entity struct
//! - `Deserialize` DTOs accepted from clients and workers
//! - `Serialize` views returned to them
//!
//! [`protocol`] holds the request/response envelopes of the HTTP protocol.

pub mod job;
pub mod protocol;
pub mod session;
pub mod worker;
