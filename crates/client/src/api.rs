//! REST client for the Dispatch Protocol endpoints.
//!
//! Wraps every route of the orchestrator using [`reqwest`]. Phase-report and
//! artifact uploads go through the client's [`RetryPolicy`]; everything else
//! is tried once.

use std::sync::atomic::{AtomicU32, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;

use hildist_core::types::{NodeId, Phase, PollResult};
use hildist_store::models::job::JobSpec;
use hildist_store::models::protocol::{
    ArtifactListResponse, ArtifactUpload, PollResponse, ReportQuery, ReportResponse,
    SessionResponse, StatusesResponse, SubmitJobsRequest, SubmitReportRequest,
    WorkerSessionResponse,
};
use hildist_store::models::session::SessionSummary;
use hildist_store::models::worker::{UpdateWorker, WorkerInfo};
use serde::Deserialize;

use crate::error::ClientError;
use crate::retry::RetryPolicy;

/// HTTP client for a single orchestrator.
#[derive(Debug, Clone)]
pub struct DispatchApi {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

impl DispatchApi {
    /// Create a client for an orchestrator.
    ///
    /// * `base_url` - e.g. `http://host:8000`. A trailing slash is ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one so an
    /// id containing `/` or `?` stays a single segment.
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let response = self.client.get(self.url(&["health"])?).send().await?;
        Self::parse_response(response).await
    }

    // ---- sessions ----

    /// Open a new session and return its id.
    pub async fn create_session(&self) -> Result<String, ClientError> {
        let response = self.client.get(self.url(&["session"])?).send().await?;
        let body: SessionResponse = Self::parse_response(response).await?;
        Ok(body.session_id)
    }

    /// Stop a session. Idempotent.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&["session", session_id, "stop"])?)
            .send()
            .await?;
        Self::check_status(response).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.url(&["session", session_id])?)
            .send()
            .await?;
        Self::check_status(response).await
    }

    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary, ClientError> {
        let response = self
            .client
            .get(self.url(&["session", session_id])?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Upload the environment bundle (a zip) as the multipart field `env`.
    pub async fn upload_env(&self, session_id: &str, bundle: Vec<u8>) -> Result<(), ClientError> {
        let part = reqwest::multipart::Part::bytes(bundle)
            .file_name("env.zip")
            .mime_str("application/zip")?;
        let form = reqwest::multipart::Form::new().part("env", part);

        let response = self
            .client
            .post(self.url(&["session", session_id, "env"])?)
            .multipart(form)
            .send()
            .await?;
        Self::check_status(response).await
    }

    pub async fn download_env(&self, session_id: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .client
            .get(self.url(&["worker", "session", session_id, "env"])?)
            .send()
            .await?;
        Self::read_bytes(response).await
    }

    // ---- jobs and reports ----

    /// Submit jobs. A 422 `UNSCHEDULABLE_TAGS` rejects the whole batch and
    /// carries the unmet tags in the error's `tags`.
    pub async fn submit_jobs(&self, session_id: &str, jobs: &[JobSpec]) -> Result<(), ClientError> {
        let body = SubmitJobsRequest {
            tests: jobs.to_vec(),
        };
        let response = self
            .client
            .post(self.url(&["session", session_id, "tests"])?)
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Present phases per job, in submission order.
    pub async fn fetch_statuses(
        &self,
        session_id: &str,
    ) -> Result<IndexMap<NodeId, Vec<Phase>>, ClientError> {
        let response = self
            .client
            .get(self.url(&["session", session_id, "tests"])?)
            .send()
            .await?;
        let body: StatusesResponse = Self::parse_response(response).await?;
        Ok(body.statuses)
    }

    pub async fn fetch_phase_report(
        &self,
        session_id: &str,
        node_id: &str,
        phase: Phase,
    ) -> Result<String, ClientError> {
        let body = ReportQuery {
            node_id: node_id.to_string(),
        };
        let response = self
            .client
            .post(self.url(&["session", session_id, "test", phase.as_str()])?)
            .json(&body)
            .send()
            .await?;
        let body: ReportResponse = Self::parse_response(response).await?;
        Ok(body.report)
    }

    /// Store one phase report, retrying transient failures.
    ///
    /// A retry can meet the report its own earlier attempt stored before the
    /// connection failed; that `DUPLICATE_REPORT` counts as success. On the
    /// first attempt it is returned, since it means the report was sent twice.
    pub async fn submit_phase_report(
        &self,
        session_id: &str,
        node_id: &str,
        phase: Phase,
        report: String,
    ) -> Result<(), ClientError> {
        let url = self.url(&["worker", "session", session_id, "test"])?;
        let body = SubmitReportRequest {
            node_id: node_id.to_string(),
            phase,
            report,
        };
        let attempts = AtomicU32::new(0);
        let (url, body, attempts) = (&url, &body, &attempts);

        let result = self
            .retry
            .run("submit_phase_report", move || async move {
                attempts.fetch_add(1, Ordering::Relaxed);
                let response = self.client.post(url.clone()).json(body).send().await?;
                Self::check_status(response).await
            })
            .await;

        match result {
            Err(e) if e.code() == Some("DUPLICATE_REPORT") && attempts.load(Ordering::Relaxed) > 1 => {
                tracing::debug!(node_id, phase = %phase, "Report stored by an earlier attempt");
                Ok(())
            }
            other => other,
        }
    }

    // ---- workers ----

    /// Find a session with work for this worker; `None` when there is none.
    pub async fn resolve_session(&self, worker_id: &str) -> Result<Option<String>, ClientError> {
        let response = self
            .client
            .get(self.url(&["worker", worker_id, "session"])?)
            .send()
            .await?;
        let body: WorkerSessionResponse = Self::parse_response(response).await?;
        Ok(body.session_id)
    }

    pub async fn poll_for_work(
        &self,
        worker_id: &str,
        session_id: &str,
    ) -> Result<PollResult, ClientError> {
        let response = self
            .client
            .get(self.url(&["worker", worker_id, "session", session_id, "tests"])?)
            .send()
            .await?;
        let body: PollResponse = Self::parse_response(response).await?;
        Ok(body.into_poll_result())
    }

    /// Replace the worker's display name and tags.
    pub async fn update_worker(
        &self,
        worker_id: &str,
        display_name: &str,
        tags: &[String],
    ) -> Result<(), ClientError> {
        let body = UpdateWorker {
            display_name: display_name.to_string(),
            tags: tags.to_vec(),
        };
        let response = self
            .client
            .post(self.url(&["worker", worker_id, "update"])?)
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&["worker", worker_id, "heartbeat"])?)
            .send()
            .await?;
        Self::check_status(response).await
    }

    pub async fn worker_info(&self, worker_id: &str) -> Result<WorkerInfo, ClientError> {
        let response = self
            .client
            .get(self.url(&["worker", worker_id, "info"])?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerInfo>, ClientError> {
        let response = self.client.get(self.url(&["worker", "list"])?).send().await?;
        Self::parse_response(response).await
    }

    // ---- artifacts ----

    /// Upload this worker's artifact bundle, retrying transient failures.
    pub async fn upload_artifact(
        &self,
        session_id: &str,
        worker_id: &str,
        bundle: &[u8],
    ) -> Result<(), ClientError> {
        let url = self.url(&["worker", "session", session_id, "artifacts"])?;
        let body = ArtifactUpload {
            worker_id: worker_id.to_string(),
            content: STANDARD.encode(bundle),
        };
        let (url, body) = (&url, &body);

        self.retry
            .run("upload_artifact", move || async move {
                let response = self.client.post(url.clone()).json(body).send().await?;
                Self::check_status(response).await
            })
            .await
    }

    /// Worker ids that uploaded a bundle.
    pub async fn list_artifacts(&self, session_id: &str) -> Result<Vec<String>, ClientError> {
        let response = self
            .client
            .get(self.url(&["session", session_id, "artifacts"])?)
            .send()
            .await?;
        let body: ArtifactListResponse = Self::parse_response(response).await?;
        Ok(body.artifact_ids)
    }

    pub async fn download_artifact(
        &self,
        session_id: &str,
        worker_id: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let response = self
            .client
            .get(self.url(&["session", session_id, "artifacts", worker_id])?)
            .send()
            .await?;
        Self::read_bytes(response).await
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or a [`ClientError::Api`]
    /// parsed from the error body.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::from_response(status.as_u16(), &body));
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ClientError> {
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn read_bytes(response: reqwest::Response) -> Result<Vec<u8>, ClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = DispatchApi::new("http://orchestrator:8000/");
        assert_eq!(api.base_url(), "http://orchestrator:8000");
        assert_eq!(
            api.url(&["session"]).unwrap().as_str(),
            "http://orchestrator:8000/session"
        );
    }

    #[test]
    fn ids_stay_one_segment() {
        let api = DispatchApi::new("http://orchestrator:8000/hildist/");
        let url = api
            .url(&["session", "s1", "artifacts", "../escaped"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://orchestrator:8000/hildist/session/s1/artifacts/..%2Fescaped"
        );
        assert_eq!(
            api.url(&["worker", "bench 7", "info"]).unwrap().as_str(),
            "http://orchestrator:8000/hildist/worker/bench%207/info"
        );
    }

    #[test]
    fn unparsable_base_url_is_reported() {
        let api = DispatchApi::new("not a url");
        assert!(matches!(api.url(&["health"]), Err(ClientError::InvalidUrl(_))));
    }
}
