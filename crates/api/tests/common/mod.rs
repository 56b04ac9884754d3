#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use hildist_api::config::ServerConfig;
use hildist_api::router::build_app_router;
use hildist_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
///
/// Any CORS origin, a 30-second request timeout and a 1 MiB body limit.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: Vec::new(),
        request_timeout_secs: 30,
        worker_timeout_secs: 120,
        max_body_bytes: 1024 * 1024,
    }
}

/// Build the full application router with all middleware layers and a fresh
/// in-memory registry.
///
/// Uses [`build_app_router`] so integration tests exercise the same
/// middleware stack (CORS, request ID, timeout, tracing, panic recovery)
/// that production uses.
pub fn build_test_app() -> Router {
    let config = test_config();
    build_app_router(AppState::new(config.clone()), &config).expect("test config is valid")
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn delete(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// Upload `bytes` as a single-field multipart form.
pub async fn post_multipart(app: &Router, uri: &str, field: &str, bytes: &[u8]) -> Response {
    let boundary = "hildist-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"env.zip\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Protocol helpers
// ---------------------------------------------------------------------------

pub async fn create_session(app: &Router) -> String {
    let response = get(app, "/session").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Register a worker by heartbeat and push its tags.
pub async fn configure_worker(app: &Router, worker_id: &str, tags: &[&str]) {
    let response = post_empty(app, &format!("/worker/{worker_id}/heartbeat")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_json(
        app,
        &format!("/worker/{worker_id}/update"),
        json!({ "display_name": worker_id, "tags": tags }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

/// Submit `(nodeid, requirements)` jobs to a session.
pub async fn submit_jobs(app: &Router, session_id: &str, jobs: &[(&str, &[&str])]) -> Response {
    let tests: Vec<Value> = jobs
        .iter()
        .map(|(id, reqs)| json!({ "nodeid": id, "worker_requirements": reqs }))
        .collect();
    post_json(
        app,
        &format!("/session/{session_id}/tests"),
        json!({ "tests": tests }),
    )
    .await
}

pub async fn poll(app: &Router, worker_id: &str, session_id: &str) -> Value {
    let response = get(app, &format!("/worker/{worker_id}/session/{session_id}/tests")).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

pub async fn submit_report(
    app: &Router,
    session_id: &str,
    node_id: &str,
    phase: &str,
    report: &str,
) -> Response {
    post_json(
        app,
        &format!("/worker/session/{session_id}/test"),
        json!({ "nodeid": node_id, "phase": phase, "report": report }),
    )
    .await
}
