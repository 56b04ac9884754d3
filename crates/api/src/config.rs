use std::str::FromStr;
use std::time::Duration;

use hildist_core::worker_pool::WORKER_TIMEOUT;

/// Default upper bound for request bodies (env bundles, artifacts).
const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// A configuration value could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be a valid {expected}, got {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for a lab network.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Seconds after which a silent worker stops being scheduled (default: `120`).
    pub worker_timeout_secs: u64,
    /// Maximum accepted request body in bytes (default: 256 MiB).
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            request_timeout_secs: 30,
            worker_timeout_secs: WORKER_TIMEOUT.as_secs(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default     |
    /// |------------------------|-------------|
    /// | `HOST`                 | `0.0.0.0`   |
    /// | `PORT`                 | `8000`      |
    /// | `CORS_ORIGINS`         | (any)       |
    /// | `REQUEST_TIMEOUT_SECS` | `30`        |
    /// | `WORKER_TIMEOUT_SECS`  | `120`       |
    /// | `MAX_BODY_BYTES`       | `268435456` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port: env_or("PORT", "u16", defaults.port)?,
            cors_origins,
            request_timeout_secs: env_or(
                "REQUEST_TIMEOUT_SECS",
                "u64",
                defaults.request_timeout_secs,
            )?,
            worker_timeout_secs: env_or("WORKER_TIMEOUT_SECS", "u64", defaults.worker_timeout_secs)?,
            max_body_bytes: env_or("MAX_BODY_BYTES", "usize", defaults.max_body_bytes)?,
        })
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }
}

/// Parse `var` if set, otherwise return `default`.
fn env_or<T: FromStr>(var: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError {
            var,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}
