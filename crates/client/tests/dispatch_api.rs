//! Exercises `DispatchApi` against a live orchestrator.
//!
//! Tests cover:
//! - Session lifecycle and job submission
//! - Structured 422 errors carrying the unmet tags
//! - Work assignment, phase reports and artifacts through the typed client

mod common;

use assert_matches::assert_matches;
use common::{configure_worker, spawn_server};
use hildist_client::ClientError;
use hildist_core::types::{Phase, PollResult, SessionState};
use hildist_store::models::job::JobSpec;

// ---------------------------------------------------------------------------
// Test: health and session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_and_session_lifecycle() {
    let api = spawn_server().await;
    assert_eq!(api.health().await.unwrap().status, "ok");

    let session_id = api.create_session().await.unwrap();
    let summary = api.session_summary(&session_id).await.unwrap();
    assert_eq!(summary.state, SessionState::Setup);

    api.stop_session(&session_id).await.unwrap();
    api.stop_session(&session_id).await.unwrap();
    let summary = api.session_summary(&session_id).await.unwrap();
    assert_eq!(summary.state, SessionState::Stopped);

    api.delete_session(&session_id).await.unwrap();
    let err = api.session_summary(&session_id).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.code(), Some("NOT_FOUND"));
}

// ---------------------------------------------------------------------------
// Test: an unprovided tag comes back as a structured error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unschedulable_tags_are_reported() {
    let api = spawn_server().await;
    configure_worker(&api, "rig", &["rig1"]).await;
    let session_id = api.create_session().await.unwrap();

    let jobs = vec![JobSpec::new("a", &["rig1"]), JobSpec::new("b", &["rig9"])];
    let err = api.submit_jobs(&session_id, &jobs).await.unwrap_err();

    assert_matches!(
        &err,
        ClientError::Api { status: 422, code, tags, .. }
            if code == "UNSCHEDULABLE_TAGS" && tags == &vec!["rig9".to_string()]
    );
    assert!(api.fetch_statuses(&session_id).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: a job goes from pending to fully reported
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_round_trip_through_typed_client() {
    let api = spawn_server().await;
    configure_worker(&api, "rig", &["rig1"]).await;
    let session_id = api.create_session().await.unwrap();
    api.submit_jobs(
        &session_id,
        &[JobSpec::new("t::a", &["rig1"]), JobSpec::new("t::b", &["rig1"])],
    )
    .await
    .unwrap();

    assert_eq!(
        api.resolve_session("rig").await.unwrap().as_deref(),
        Some(session_id.as_str())
    );

    let work = api.poll_for_work("rig", &session_id).await.unwrap();
    assert_eq!(
        work,
        PollResult::Run {
            now: "t::a".into(),
            next: Some("t::b".into()),
        }
    );

    for phase in Phase::ALL {
        api.submit_phase_report(&session_id, "t::a", phase, format!("{phase} report"))
            .await
            .unwrap();
    }

    let statuses = api.fetch_statuses(&session_id).await.unwrap();
    assert_eq!(statuses.keys().collect::<Vec<_>>(), vec!["t::a", "t::b"]);
    assert_eq!(statuses["t::a"], Phase::ALL.to_vec());
    assert!(statuses["t::b"].is_empty());

    let report = api
        .fetch_phase_report(&session_id, "t::a", Phase::Call)
        .await
        .unwrap();
    assert_eq!(report, "call report");

    let err = api
        .submit_phase_report(&session_id, "t::a", Phase::Call, "again".into())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("DUPLICATE_REPORT"));
}

// ---------------------------------------------------------------------------
// Test: env bundle and artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn env_and_artifact_bundles() {
    let api = spawn_server().await;
    let session_id = api.create_session().await.unwrap();

    api.upload_env(&session_id, b"env-bytes".to_vec()).await.unwrap();
    assert_eq!(api.download_env(&session_id).await.unwrap(), b"env-bytes");

    api.upload_artifact(&session_id, "bench-7", b"zip-bytes")
        .await
        .unwrap();
    assert_eq!(
        api.list_artifacts(&session_id).await.unwrap(),
        vec!["bench-7".to_string()]
    );
    assert_eq!(
        api.download_artifact(&session_id, "bench-7").await.unwrap(),
        b"zip-bytes"
    );
}

// ---------------------------------------------------------------------------
// Test: worker info and listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_info_and_list() {
    let api = spawn_server().await;

    let err = api.worker_info("bench-7").await.unwrap_err();
    assert_eq!(err.status(), Some(404));

    api.heartbeat("bench-7").await.unwrap();
    let err = api.worker_info("bench-7").await.unwrap_err();
    assert_eq!(err.code(), Some("WORKER_UNCONFIGURED"));

    configure_worker(&api, "bench-7", &["rig1"]).await;
    let info = api.worker_info("bench-7").await.unwrap();
    assert_eq!(info.tags, vec!["rig1".to_string()]);

    let workers = api.list_workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].worker_id, "bench-7");
}
