#![allow(dead_code)]

use std::net::SocketAddr;

use hildist_api::config::ServerConfig;
use hildist_api::router::build_app_router;
use hildist_api::state::AppState;
use hildist_client::{DispatchApi, RetryPolicy};

/// Serve a fresh orchestrator on an ephemeral port and return a client for it.
///
/// The server task lives until the test runtime shuts down.
pub async fn spawn_server() -> DispatchApi {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: Vec::new(),
        request_timeout_secs: 30,
        worker_timeout_secs: 120,
        max_body_bytes: 1024 * 1024,
    };
    let app = build_app_router(AppState::new(config.clone()), &config).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    DispatchApi::new(format!("http://{addr}")).with_retry_policy(RetryPolicy::NONE)
}

/// Register a worker and push its tags.
pub async fn configure_worker(api: &DispatchApi, worker_id: &str, tags: &[&str]) {
    api.heartbeat(worker_id).await.unwrap();
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    api.update_worker(worker_id, worker_id, &tags).await.unwrap();
}
