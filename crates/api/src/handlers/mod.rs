pub mod artifacts;
pub mod sessions;
pub mod workers;
