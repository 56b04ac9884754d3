//! Handlers for session lifecycle, job submission and phase reports.

use axum::extract::{Multipart, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use hildist_core::types::Phase;
use hildist_store::models::protocol::{
    ReportQuery, ReportResponse, SessionResponse, StatusesResponse, SubmitJobsRequest,
    SubmitReportRequest,
};

use crate::error::{AppError, AppResult};
use crate::response::MessageResponse;
use crate::state::AppState;

/// Multipart field carrying the environment bundle.
const ENV_FIELD: &str = "env";

// ---------------------------------------------------------------------------
// GET /session
// ---------------------------------------------------------------------------

/// Create a new session.
pub async fn create_session(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let session_id = state.registry.create_session().await;
    Ok(Json(SessionResponse { session_id }))
}

// ---------------------------------------------------------------------------
// GET /session/{id}
// ---------------------------------------------------------------------------

/// Diagnostic summary of a session.
pub async fn session_summary(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let summary = state.registry.session_summary(&session_id).await?;
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// DELETE /session/{id}
// ---------------------------------------------------------------------------

/// Drop a session and free its artifacts.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<StatusCode> {
    state.registry.delete_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /session/{id}/stop
// ---------------------------------------------------------------------------

/// Stop a session. Stopping twice is not an error.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.registry.stop_session(&session_id).await?;
    Ok(Json(MessageResponse::new("Session stopped successfully")))
}

// ---------------------------------------------------------------------------
// POST /session/{id}/env
// ---------------------------------------------------------------------------

/// Upload the environment bundle workers need before running jobs.
pub async fn upload_env(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(ENV_FIELD) {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read env bundle: {e}")))?;
        state.registry.upload_env(&session_id, bytes.to_vec()).await?;
        return Ok(Json(MessageResponse::new("Environment uploaded successfully")));
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field \"{ENV_FIELD}\""
    )))
}

// ---------------------------------------------------------------------------
// GET /worker/session/{id}/env
// ---------------------------------------------------------------------------

/// Download the environment bundle.
pub async fn download_env(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.registry.download_env(&session_id).await?;
    Ok(([(CONTENT_TYPE, "application/zip")], bytes))
}

// ---------------------------------------------------------------------------
// POST /session/{id}/tests
// ---------------------------------------------------------------------------

/// Submit collected jobs. The whole batch is rejected if any job needs a
/// tag no active worker has.
pub async fn submit_jobs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(input): Json<SubmitJobsRequest>,
) -> AppResult<impl IntoResponse> {
    state.registry.submit_jobs(&session_id, input.tests).await?;
    Ok(Json(MessageResponse::new("Tests added successfully")))
}

// ---------------------------------------------------------------------------
// GET /session/{id}/tests
// ---------------------------------------------------------------------------

/// Phases reported so far for every job.
pub async fn fetch_statuses(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let statuses = state.registry.fetch_statuses(&session_id).await?;
    Ok(Json(StatusesResponse { statuses }))
}

// ---------------------------------------------------------------------------
// POST /session/{id}/test/{phase}
// ---------------------------------------------------------------------------

/// Fetch a single phase report.
pub async fn fetch_phase_report(
    State(state): State<AppState>,
    Path((session_id, phase)): Path<(String, Phase)>,
    Json(input): Json<ReportQuery>,
) -> AppResult<impl IntoResponse> {
    let report = state
        .registry
        .fetch_phase_report(&session_id, &input.node_id, phase)
        .await?;
    Ok(Json(ReportResponse { report }))
}

// ---------------------------------------------------------------------------
// POST /worker/session/{id}/test
// ---------------------------------------------------------------------------

/// Store a phase report produced by a worker.
pub async fn submit_phase_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(input): Json<SubmitReportRequest>,
) -> AppResult<impl IntoResponse> {
    state
        .registry
        .submit_phase_report(&session_id, &input.node_id, input.phase, input.report)
        .await?;
    Ok(Json(MessageResponse::new("Report submitted successfully")))
}
