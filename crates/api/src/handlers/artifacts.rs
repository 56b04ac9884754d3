//! Handlers for per-worker artifact bundles.

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use hildist_store::models::protocol::{ArtifactListResponse, ArtifactUpload};

use crate::error::{AppError, AppResult};
use crate::response::MessageResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /worker/session/{id}/artifacts
// ---------------------------------------------------------------------------

/// Store a worker's zipped artifacts, replacing any earlier upload.
pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(input): Json<ArtifactUpload>,
) -> AppResult<impl IntoResponse> {
    let bytes = STANDARD
        .decode(input.content.as_bytes())
        .map_err(|e| AppError::BadRequest(format!("Artifact content is not valid base64: {e}")))?;

    state
        .registry
        .upload_artifact(&session_id, &input.worker_id, bytes)
        .await?;
    Ok(Json(MessageResponse::new("Artifact uploaded successfully")))
}

// ---------------------------------------------------------------------------
// GET /session/{id}/artifacts
// ---------------------------------------------------------------------------

/// Ids of the workers that uploaded artifacts.
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let artifact_ids = state.registry.list_artifacts(&session_id).await?;
    Ok(Json(ArtifactListResponse { artifact_ids }))
}

// ---------------------------------------------------------------------------
// GET /session/{id}/artifacts/{worker_id}
// ---------------------------------------------------------------------------

/// Raw zip bundle of one worker.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((session_id, worker_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let bytes = state
        .registry
        .download_artifact(&session_id, &worker_id)
        .await?;
    Ok(([(CONTENT_TYPE, "application/zip")], bytes))
}
