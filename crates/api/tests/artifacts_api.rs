//! Integration tests for artifact upload, listing and download.

mod common;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{body_bytes, body_json, create_session, get, post_empty, post_json};
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: uploaded bundle is listed and downloadable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifact_round_trip() {
    let app = common::build_test_app();
    let session_id = create_session(&app).await;
    let bundle = vec![0x50, 0x4b, 0x05, 0x06, 1, 2, 3];

    let response = post_json(
        &app,
        &format!("/worker/session/{session_id}/artifacts"),
        json!({ "worker_id": "bench-7", "content": STANDARD.encode(&bundle) }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(get(&app, &format!("/session/{session_id}/artifacts")).await).await;
    assert_eq!(json["artifact_ids"], json!(["bench-7"]));

    let response = get(&app, &format!("/session/{session_id}/artifacts/bench-7")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.to_vec(), bundle);
}

// ---------------------------------------------------------------------------
// Test: malformed payloads and missing bundles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_base64_returns_400() {
    let app = common::build_test_app();
    let session_id = create_session(&app).await;

    let response = post_json(
        &app,
        &format!("/worker/session/{session_id}/artifacts"),
        json!({ "worker_id": "w1", "content": "not base64!" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn worker_id_must_be_one_path_segment() {
    let app = common::build_test_app();
    let session_id = create_session(&app).await;

    let response = post_json(
        &app,
        &format!("/worker/session/{session_id}/artifacts"),
        json!({ "worker_id": "../escaped", "content": STANDARD.encode(b"zip") }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

    let json = body_json(get(&app, &format!("/session/{session_id}/artifacts")).await).await;
    assert_eq!(json["artifact_ids"], json!([]));
}

#[tokio::test]
async fn missing_artifact_returns_404() {
    let app = common::build_test_app();
    let session_id = create_session(&app).await;

    let response = get(&app, &format!("/session/{session_id}/artifacts/nobody")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_after_stop_is_rejected() {
    let app = common::build_test_app();
    let session_id = create_session(&app).await;
    post_empty(&app, &format!("/session/{session_id}/stop")).await;

    let response = post_json(
        &app,
        &format!("/worker/session/{session_id}/artifacts"),
        json!({ "worker_id": "w1", "content": "" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "SESSION_STOPPED");
}
