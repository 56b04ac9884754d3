//! Handlers for worker registration, discovery and work assignment.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use hildist_store::models::protocol::{PollResponse, WorkerSessionResponse};
use hildist_store::models::worker::{UpdateWorker, WorkerInfo};

use crate::error::AppResult;
use crate::response::MessageResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /worker/list
// ---------------------------------------------------------------------------

/// List active workers.
pub async fn list_workers(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workers: Vec<WorkerInfo> = state
        .registry
        .active_workers()
        .await
        .into_iter()
        .map(WorkerInfo::from)
        .collect();
    Ok(Json(workers))
}

// ---------------------------------------------------------------------------
// GET /worker/{worker_id}/session
// ---------------------------------------------------------------------------

/// Find a session with work for this worker, registering it on first contact.
pub async fn resolve_session(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session_id = state.registry.resolve_worker_session(&worker_id).await?;
    Ok(Json(WorkerSessionResponse { session_id }))
}

// ---------------------------------------------------------------------------
// GET /worker/{worker_id}/session/{id}/tests
// ---------------------------------------------------------------------------

/// Claim the next job, with the one after it as a lookahead hint.
pub async fn poll_for_work(
    State(state): State<AppState>,
    Path((worker_id, session_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let result = state
        .registry
        .poll_for_work(&session_id, &worker_id)
        .await?;
    Ok(Json(PollResponse::from(result)))
}

// ---------------------------------------------------------------------------
// POST /worker/{worker_id}/update
// ---------------------------------------------------------------------------

/// Replace a worker's display name and tags.
pub async fn update_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(input): Json<UpdateWorker>,
) -> AppResult<impl IntoResponse> {
    state.registry.update_worker(&worker_id, &input).await?;
    Ok(Json(MessageResponse::new("Worker updated successfully")))
}

// ---------------------------------------------------------------------------
// POST /worker/{worker_id}/heartbeat
// ---------------------------------------------------------------------------

/// Refresh a worker's liveness.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.registry.heartbeat(&worker_id).await;
    tracing::trace!(worker_id = %worker_id, "Heartbeat received");
    Ok(Json(MessageResponse::new("Heartbeat received")))
}

// ---------------------------------------------------------------------------
// GET /worker/{worker_id}/info
// ---------------------------------------------------------------------------

/// Describe a configured worker.
pub async fn worker_info(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let worker = state.registry.get_worker(&worker_id).await?;
    Ok(Json(WorkerInfo::from(worker)))
}
