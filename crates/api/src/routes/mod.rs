pub mod health;
pub mod sessions;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Build the Dispatch Protocol route tree.
///
/// Routes are mounted at the root; drivers address them directly.
///
/// ```text
/// /session                                         create session (GET)
/// /session/{id}                                    summary, delete
/// /session/{id}/stop                               stop (POST)
/// /session/{id}/env                                upload env bundle (multipart)
/// /session/{id}/tests                              submit jobs, fetch statuses
/// /session/{id}/test/{phase}                       fetch one phase report (POST)
/// /session/{id}/artifacts                          list artifact ids
/// /session/{id}/artifacts/{worker_id}              download one bundle
///
/// /worker/list                                     active workers
/// /worker/session/{id}/env                         download env bundle
/// /worker/session/{id}/test                        submit phase report (POST)
/// /worker/session/{id}/artifacts                   upload bundle (POST)
/// /worker/{worker_id}/session                      discover a session
/// /worker/{worker_id}/session/{id}/tests           poll for work
/// /worker/{worker_id}/update                       push configuration (POST)
/// /worker/{worker_id}/heartbeat                    refresh liveness (POST)
/// /worker/{worker_id}/info                         worker description
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(sessions::router())
        .merge(workers::router())
}
