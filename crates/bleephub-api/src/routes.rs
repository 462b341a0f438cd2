//! API route definitions.

use axum::{
    Router,
    extract::Request,
    middleware::from_fn,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::handlers::{
    actions, agents, broker, connection, health, run_service, secrets, timeline, workflows,
};
use crate::middleware::{catch_all, cors_layer, log_requests, request_id, tenant_fallback};
use crate::state::AppState;

/// Every route at its canonical path, unmatched requests answered by the
/// catch-all.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/_apis", runner_routes())
        .nest("/api/v3", github_routes())
        .route("/health", get(health::health))
        .route("/internal/metrics", get(health::metrics))
        .route("/internal/status", get(health::status))
        .fallback(catch_all)
        .with_state(state)
}

/// The served application: routes, tenant prefix stripping and middleware.
pub fn build_app(state: Arc<AppState>) -> Router {
    let router = create_router(state);
    let inner = router.clone();
    router
        .fallback(move |request: Request| tenant_fallback(inner.clone(), request))
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .layer(cors_layer())
}

fn runner_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connectionData", get(connection::connection_data))
        .nest("/v1", runner_v1_routes())
}

fn runner_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth", post(connection::oauth_token))
        .route("/auth/", post(connection::oauth_token))
        .merge(agent_routes())
        .merge(broker_routes())
        .merge(run_service_routes())
        .merge(timeline_routes())
        .route(
            "/ActionDownloadInfo/{scope_id}/{hub_name}/{plan_id}",
            post(actions::download_info),
        )
        .route(
            "/actions/tarball/{owner}/{repo}/{*git_ref}",
            get(actions::tarball),
        )
}

fn agent_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/AgentPools", get(agents::list_pools))
        .route(
            "/Agent/{pool_id}",
            get(agents::list_agents).post(agents::register_agent),
        )
        .route(
            "/Agent/{pool_id}/{agent_id}",
            get(agents::get_agent)
                .put(agents::replace_agent)
                .delete(agents::delete_agent),
        )
}

fn broker_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/AgentSession/{pool_id}", post(broker::create_session))
        .route(
            "/AgentSession/{pool_id}/{session_id}",
            axum::routing::delete(broker::delete_session),
        )
        .route("/Message/{pool_id}", get(broker::get_message))
        .route(
            "/Message/{pool_id}/{message_id}",
            axum::routing::delete(broker::delete_message),
        )
}

fn run_service_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/AgentRequest/{pool_id}/{request_id}",
            get(run_service::get_request)
                .patch(run_service::renew_request)
                .put(run_service::renew_request)
                .delete(run_service::complete_request),
        )
        .route(
            "/FinishJob/{scope_id}/{hub_name}/{plan_id}",
            post(run_service::finish_job),
        )
        .route("/plans/{plan_id}/events", put(run_service::job_events))
        .route("/tasks", post(run_service::telemetry))
        .route("/tasks/{task_id}/{version}", get(run_service::get_task))
}

fn timeline_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/Timeline/{scope_id}/{hub_name}/{plan_id}/timeline",
            post(timeline::create_timeline),
        )
        .route(
            "/Timeline/{scope_id}/{hub_name}/{plan_id}/timeline/{timeline_id}",
            post(timeline::create_timeline).put(timeline::create_timeline),
        )
        .route(
            "/Timeline/{scope_id}/{hub_name}/{plan_id}/{timeline_id}",
            axum::routing::patch(timeline::update_records),
        )
        .route(
            "/Timeline/{scope_id}/{hub_name}/{plan_id}/{timeline_id}/attachments/{record_id}/{kind}/{name}",
            put(timeline::attachment),
        )
        .route(
            "/Logfiles/{scope_id}/{hub_name}/{plan_id}",
            post(timeline::create_log),
        )
        .route(
            "/Logfiles/{scope_id}/{hub_name}/{plan_id}/{log_id}",
            post(timeline::upload_log),
        )
        .route(
            "/TimeLineWebConsoleLog/{scope_id}/{hub_name}/{plan_id}/{timeline_id}/{record_id}",
            post(timeline::web_console_log),
        )
}

fn github_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/actions/runner-registration",
            post(connection::runner_registration),
        )
        .route(
            "/repos/{owner}/{repo}/actions/runners/registration-token",
            post(connection::registration_token),
        )
        .route(
            "/repos/{owner}/{repo}/actions/secrets",
            get(secrets::list_secrets),
        )
        .route(
            "/repos/{owner}/{repo}/actions/secrets/{name}",
            get(secrets::get_secret)
                .put(secrets::put_secret)
                .delete(secrets::delete_secret),
        )
        .nest("/bleephub", tenant_routes())
}

fn tenant_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workflow", post(workflows::submit_workflow))
        .route("/workflows/{id}", get(workflows::get_workflow))
        .route("/workflows/{id}/cancel", post(workflows::cancel_workflow))
        .route("/submit", post(workflows::submit_job))
        .route("/jobs/{job_id}", get(workflows::get_job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, StatusCode};
    use bleephub_scheduler::{
        ActionCache, GithubTarballSource, Scheduler, SchedulerConfig, SchedulerMetrics, Store,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        let scheduler = Scheduler::new(
            Arc::new(Store::new()),
            Arc::new(SchedulerMetrics::new()),
            SchedulerConfig::default(),
        );
        let source = GithubTarballSource::new("http://127.0.0.1:9").unwrap();
        let state = AppState::new(Arc::new(scheduler), Arc::new(ActionCache::new(Arc::new(source))));
        build_app(Arc::new(state))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "bleephub.test:5555")
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_the_service() {
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "bleephub");
    }

    #[tokio::test]
    async fn tenant_prefix_is_stripped() {
        let (status, body) = send(&app(), Method::GET, "/acme/app/_apis/connectionData", None).await;
        assert_eq!(status, StatusCode::OK);
        let defs = body["locationServiceData"]["serviceDefinitions"]
            .as_array()
            .unwrap();
        assert_eq!(defs.len(), 14);
    }

    #[tokio::test]
    async fn unknown_paths_get_an_empty_ok() {
        let (status, body) = send(&app(), Method::GET, "/nothing/here", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn registration_points_back_at_the_tenant() {
        let (status, body) = send(
            &app(),
            Method::POST,
            "/api/v3/actions/runner-registration",
            Some(json!({"url": "https://github.com/acme/app", "runner_event": "register"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "http://bleephub.test:5555/acme/app");
        assert_eq!(body["token_schema"], "OAuthAccessToken");
    }

    #[tokio::test]
    async fn workflow_submit_and_fetch() {
        let app = app();
        let yaml = "name: ci\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo hi\n";
        let (status, submitted) = send(
            &app,
            Method::POST,
            "/api/v3/bleephub/workflow",
            Some(json!({"workflow": yaml, "ref": "refs/heads/dev"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["status"], "running");
        assert_eq!(submitted["jobs"]["build"]["status"], "queued");

        let id = submitted["workflowId"].as_str().unwrap();
        let (status, workflow) =
            send(&app, Method::GET, &format!("/api/v3/bleephub/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(workflow["name"], "ci");
        assert_eq!(workflow["ref"], "refs/heads/dev");
        assert_eq!(workflow["eventName"], "push");
    }

    #[tokio::test]
    async fn malformed_workflow_is_a_bad_request() {
        let (status, _) = send(
            &app(),
            Method::POST,
            "/api/v3/bleephub/workflow",
            Some(json!({"workflow": "name: empty\n"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let app = app();
        let (status, _) = send(&app, Method::GET, "/api/v3/bleephub/workflows/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = bleephub_core::WorkflowId::new();
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/v3/bleephub/workflows/{id}/cancel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn secrets_lifecycle() {
        let app = app();
        let base = "/api/v3/repos/acme/app/actions/secrets";
        let (status, _) = send(&app, Method::PUT, &format!("{base}/token"), Some(json!({"value": "s3cr3t"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, Method::PUT, &format!("{base}/TOKEN"), Some(json!({"value": "other"}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, list) = send(&app, Method::GET, base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total_count"], 1);
        assert_eq!(list["secrets"][0]["name"], "TOKEN");
        assert!(list["secrets"][0].get("value").is_none());

        let (status, _) = send(&app, Method::DELETE, &format!("{base}/token"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::DELETE, &format!("{base}/token"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_info_points_at_the_proxy() {
        let (status, body) = send(
            &app(),
            Method::POST,
            "/_apis/v1/ActionDownloadInfo/scope/build/plan",
            Some(json!({"actions": [{"nameWithOwner": "actions/checkout", "ref": "v4"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let info = &body["actions"]["actions/checkout@v4"];
        assert_eq!(
            info["tarballUrl"],
            "http://bleephub.test:5555/_apis/v1/actions/tarball/actions/checkout/v4"
        );
        assert_eq!(info["resolvedSha"], "0".repeat(40));
        assert_eq!(info["authentication"]["token"], "x-access-token");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_bad_gateway() {
        let (status, _) = send(
            &app(),
            Method::GET,
            "/_apis/v1/actions/tarball/actions/checkout/v4",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn console_lines_must_be_a_list() {
        let app = app();
        let uri = "/_apis/v1/TimeLineWebConsoleLog/s/h/p/t/r";
        let (status, body) = send(&app, Method::POST, uri, Some(json!({"count": 2, "value": ["a", "b"]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let (status, _) = send(&app, Method::POST, uri, Some(json!({"lines": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
