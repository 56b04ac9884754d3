//! Route definitions for the worker side of the protocol.
//!
//! Unauthenticated: workers identify themselves by hardware id only.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{artifacts, sessions, workers};
use crate::state::AppState;

/// Worker-facing routes.
///
/// ```text
/// GET  /worker/list                            -> list_workers
/// GET  /worker/session/{id}/env                -> download_env
/// POST /worker/session/{id}/test               -> submit_phase_report
/// POST /worker/session/{id}/artifacts          -> upload_artifact
/// GET  /worker/{worker_id}/session             -> resolve_session
/// GET  /worker/{worker_id}/session/{id}/tests  -> poll_for_work
/// POST /worker/{worker_id}/update              -> update_worker
/// POST /worker/{worker_id}/heartbeat           -> heartbeat
/// GET  /worker/{worker_id}/info                -> worker_info
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/worker/list", get(workers::list_workers))
        .route("/worker/session/{id}/env", get(sessions::download_env))
        .route(
            "/worker/session/{id}/test",
            post(sessions::submit_phase_report),
        )
        .route(
            "/worker/session/{id}/artifacts",
            post(artifacts::upload_artifact),
        )
        .route("/worker/{worker_id}/session", get(workers::resolve_session))
        .route(
            "/worker/{worker_id}/session/{id}/tests",
            get(workers::poll_for_work),
        )
        .route("/worker/{worker_id}/update", post(workers::update_worker))
        .route("/worker/{worker_id}/heartbeat", post(workers::heartbeat))
        .route("/worker/{worker_id}/info", get(workers::worker_info))
}
