//! Test helper functions and utilities.

use anyhow::Context;
use bleephub_api::{AppState, build_app};
use bleephub_scheduler::{
    ActionCache, GithubTarballSource, Scheduler, SchedulerConfig, SchedulerMetrics, Store,
};
use reqwest::Client;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Upstream that refuses connections; tarball fetches fail fast.
pub const UNREACHABLE_UPSTREAM: &str = "http://127.0.0.1:9";

pub struct TestServerOptions {
    pub scheduler: SchedulerConfig,
    pub github_api_url: String,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            github_api_url: UNREACHABLE_UPSTREAM.to_string(),
        }
    }
}

/// A running in-process server. Stops when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: ApiTestClient,
    pub scheduler: Arc<Scheduler>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start_test_server() -> anyhow::Result<TestServer> {
    start_test_server_with(TestServerOptions::default()).await
}

/// Start the real app on `127.0.0.1:0`.
pub async fn start_test_server_with(options: TestServerOptions) -> anyhow::Result<TestServer> {
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(Store::new()),
        Arc::new(SchedulerMetrics::new()),
        options.scheduler,
    ));
    let source = GithubTarballSource::new(options.github_api_url)?;
    let state = AppState::new(
        Arc::clone(&scheduler),
        Arc::new(ActionCache::new(Arc::new(source))),
    );
    let app = build_app(Arc::new(state));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "test server stopped");
        }
    });

    Ok(TestServer {
        addr,
        client: ApiTestClient::new(addr),
        scheduler,
        handle,
    })
}

/// Create an HTTP client for testing. Long enough for a full message poll.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(45))
        .build()
        .unwrap_or_default()
}

/// API test client with base URL.
#[derive(Clone)]
pub struct ApiTestClient {
    client: Client,
    base_url: String,
}

impl ApiTestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: test_client(),
            base_url: format!("http://{addr}"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client.post(self.url(path)).json(body).send().await
    }

    pub async fn put<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client.put(self.url(path)).json(body).send().await
    }

    pub async fn patch<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client.patch(self.url(path)).json(body).send().await
    }

    pub async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.delete(self.url(path)).send().await
    }

    /// GET and decode a JSON body.
    pub async fn get_json(&self, path: &str) -> anyhow::Result<Value> {
        let resp = self.get(path).await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// POST and decode a JSON body.
    pub async fn post_json<T: serde::Serialize>(&self, path: &str, body: &T) -> anyhow::Result<Value> {
        let resp = self.post(path, body).await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Check health endpoint.
    pub async fn health(&self) -> anyhow::Result<bool> {
        let resp = self.get("/health").await?;
        Ok(resp.status().is_success())
    }

    /// Submit workflow YAML; returns the submit response.
    pub async fn submit_workflow(&self, yaml: &str) -> anyhow::Result<Value> {
        self.post_json("/api/v3/bleephub/workflow", &json!({ "workflow": yaml }))
            .await
    }

    pub async fn workflow(&self, id: &str) -> anyhow::Result<Value> {
        self.get_json(&format!("/api/v3/bleephub/workflows/{id}")).await
    }
}

/// A job request as a runner receives it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub message_id: u64,
    pub request_id: u64,
    pub job_id: String,
    pub plan_id: String,
    pub scope_id: String,
    pub display_name: String,
    /// The decoded job request body.
    pub body: Value,
}

impl JobRequest {
    fn from_message(message: &Value) -> anyhow::Result<Self> {
        let raw = message["body"].as_str().context("message body is not a string")?;
        let body: Value = serde_json::from_str(raw)?;
        let text = |value: &Value| value.as_str().unwrap_or_default().to_string();
        Ok(Self {
            message_id: message["messageId"].as_u64().unwrap_or_default(),
            request_id: body["requestId"].as_u64().context("missing requestId")?,
            job_id: text(&body["jobId"]),
            plan_id: text(&body["plan"]["planId"]),
            scope_id: text(&body["plan"]["scopeIdentifier"]),
            display_name: text(&body["jobDisplayName"]),
            body,
        })
    }
}

/// Speaks the runner side of the protocol against a test server.
pub struct RunnerClient {
    client: ApiTestClient,
    pub session_id: String,
}

impl RunnerClient {
    /// Open a session for a runner named `name`.
    pub async fn connect(client: &ApiTestClient, name: &str) -> anyhow::Result<Self> {
        let session = client
            .post_json("/_apis/v1/AgentSession/1", &crate::fixtures::session_body(name))
            .await?;
        let session_id = session["sessionId"]
            .as_str()
            .context("session response has no sessionId")?
            .to_string();
        Ok(Self {
            client: client.clone(),
            session_id,
        })
    }

    /// Long-poll once. `None` when the poll came back empty.
    pub async fn poll(&self) -> anyhow::Result<Option<JobRequest>> {
        let resp = self
            .client
            .get(&format!("/_apis/v1/Message/1?sessionId={}", self.session_id))
            .await?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let message: Value = serde_json::from_slice(&bytes)?;
        JobRequest::from_message(&message).map(Some)
    }

    /// Poll, failing if nothing arrives.
    pub async fn next_job(&self) -> anyhow::Result<JobRequest> {
        self.poll().await?.context("expected a job request")
    }

    pub async fn acquire(&self, job: &JobRequest) -> anyhow::Result<Value> {
        let resp = self
            .client
            .patch(&format!("/_apis/v1/AgentRequest/1/{}", job.request_id), &json!({}))
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Report the final result with step outputs (`"<step>.<name>" -> value`).
    pub async fn finish(&self, job: &JobRequest, result: &str, outputs: Value) -> anyhow::Result<()> {
        let path = format!("/_apis/v1/FinishJob/{}/build/{}", job.scope_id, job.plan_id);
        let body = json!({
            "jobId": job.job_id,
            "result": result,
            "outputVariables": outputs,
        });
        self.client.post(&path, &body).await?.error_for_status()?;
        Ok(())
    }

    /// Release the request, optionally with a result.
    pub async fn release(&self, job: &JobRequest, result: Option<&str>) -> anyhow::Result<()> {
        let mut path = format!("/_apis/v1/AgentRequest/1/{}", job.request_id);
        if let Some(result) = result {
            path.push_str(&format!("?result={result}"));
        }
        self.client.delete(&path).await?.error_for_status()?;
        Ok(())
    }

    /// Acquire, finish and release: one complete job run.
    pub async fn run(&self, job: &JobRequest, result: &str, outputs: Value) -> anyhow::Result<()> {
        self.acquire(job).await?;
        self.finish(job, result, outputs).await?;
        self.release(job, None).await
    }

    pub async fn disconnect(self) -> anyhow::Result<()> {
        self.client
            .delete(&format!("/_apis/v1/AgentSession/1/{}", self.session_id))
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_immediate() {
        let result = wait_for(Duration::from_secs(1), Duration::from_millis(10), || async {
            true
        })
        .await;
        assert!(result);
    }

    #[tokio::test]
    async fn wait_for_timeout() {
        let result = wait_for(
            Duration::from_millis(100),
            Duration::from_millis(10),
            || async { false },
        )
        .await;
        assert!(!result);
    }

    #[test]
    fn job_request_is_decoded_from_the_envelope() {
        let body = json!({
            "requestId": 4,
            "jobId": "j-1",
            "jobDisplayName": "build",
            "plan": {"planId": "p-1", "scopeIdentifier": "s-1"}
        });
        let message = json!({"messageId": 9, "messageType": "PipelineAgentJobRequest", "body": body.to_string()});
        let job = JobRequest::from_message(&message).unwrap();
        assert_eq!(job.message_id, 9);
        assert_eq!(job.request_id, 4);
        assert_eq!(job.plan_id, "p-1");
        assert_eq!(job.scope_id, "s-1");
        assert_eq!(job.display_name, "build");
    }
}
