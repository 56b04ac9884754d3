use std::sync::Arc;

use hildist_store::Registry;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Sessions, jobs, artifacts and the worker registry.
    pub registry: Arc<Registry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(config.worker_timeout())),
            config: Arc::new(config),
        }
    }
}
