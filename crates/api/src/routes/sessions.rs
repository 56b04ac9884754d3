//! Route definitions for the client side of the protocol.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{artifacts, sessions};
use crate::state::AppState;

/// Client-facing routes.
///
/// ```text
/// GET    /session                              -> create_session
/// GET    /session/{id}                         -> session_summary
/// DELETE /session/{id}                         -> delete_session
/// POST   /session/{id}/stop                    -> stop_session
/// POST   /session/{id}/env                     -> upload_env
/// POST   /session/{id}/tests                   -> submit_jobs
/// GET    /session/{id}/tests                   -> fetch_statuses
/// POST   /session/{id}/test/{phase}            -> fetch_phase_report
/// GET    /session/{id}/artifacts               -> list_artifacts
/// GET    /session/{id}/artifacts/{worker_id}   -> download_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", get(sessions::create_session))
        .route(
            "/session/{id}",
            get(sessions::session_summary).delete(sessions::delete_session),
        )
        .route("/session/{id}/stop", post(sessions::stop_session))
        .route("/session/{id}/env", post(sessions::upload_env))
        .route(
            "/session/{id}/tests",
            post(sessions::submit_jobs).get(sessions::fetch_statuses),
        )
        .route(
            "/session/{id}/test/{phase}",
            post(sessions::fetch_phase_report),
        )
        .route("/session/{id}/artifacts", get(artifacts::list_artifacts))
        .route(
            "/session/{id}/artifacts/{worker_id}",
            get(artifacts::download_artifact),
        )
}
