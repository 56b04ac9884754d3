use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hildist_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `hildist_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Only UNSCHEDULABLE_TAGS carries an extra field.
        let mut tags = None;

        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::WorkerUnconfigured(_) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "WORKER_UNCONFIGURED",
                    core.to_string(),
                ),
                CoreError::UnschedulableTags(unmet) => {
                    tags = Some(unmet.iter().cloned().collect::<Vec<_>>());
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "UNSCHEDULABLE_TAGS",
                        core.to_string(),
                    )
                }
                CoreError::DuplicatePhaseReport { .. } => {
                    (StatusCode::CONFLICT, "DUPLICATE_REPORT", core.to_string())
                }
                CoreError::SessionStopped(_) => {
                    (StatusCode::CONFLICT, "SESSION_STOPPED", core.to_string())
                }
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                // Scheduler errors never cross the HTTP boundary.
                CoreError::UnschedulableJob { .. }
                | CoreError::CollectionMismatch(_)
                | CoreError::Internal(_) => {
                    tracing::error!(error = %core, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(tags) = tags {
            body["tags"] = json!(tags);
        }

        (status, axum::Json(body)).into_response()
    }
}
