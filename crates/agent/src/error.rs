use hildist_client::ClientError;
use hildist_core::types::NodeId;
use hildist_worker::PoolError;

/// Errors that end a driver run.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Talking to the orchestrator failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The run ended before these jobs produced a teardown report.
    #[error("{} job(s) did not complete: {}", missing.len(), missing.join(", "))]
    Incomplete { missing: Vec<NodeId> },

    /// Some phase reports never reached the orchestrator.
    #[error("{failed} phase report(s) could not be submitted")]
    ReportUpload { failed: usize },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact bundle error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid job list: {0}")]
    Jobs(#[from] serde_json::Error),

    /// Invalid command-line combination.
    #[error("{0}")]
    Usage(String),
}

impl DriverError {
    /// Process exit code for this error.
    ///
    /// Usage errors exit with 2 like clap's own; everything else with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::Usage(_) => 2,
            _ => 1,
        }
    }
}
