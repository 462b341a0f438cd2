//! Job request lifecycle: fetch, renew, release and the final report.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bleephub_core::ids::{JobId, PlanId};
use bleephub_core::outputs::extract_output_variables;
use bleephub_scheduler::AcquiredJob;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ApiResult, api_error, bad_request};
use crate::state::AppState;

fn parse_request_id(raw: &str) -> ApiResult<u64> {
    raw.parse()
        .map_err(|_| bad_request(format!("invalid request id: {raw}")))
}

/// The stored job envelope, served byte for byte.
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, request_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let request_id = parse_request_id(&request_id)?;
    let message = state
        .scheduler
        .job_message(request_id)
        .await
        .map_err(api_error)?;
    debug!(request_id, "job request fetched");
    Ok(([(header::CONTENT_TYPE, "application/json")], message).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewedRequest {
    pub request_id: u64,
    pub locked_until: String,
    pub plan_id: PlanId,
    pub job_id: JobId,
}

impl From<AcquiredJob> for RenewedRequest {
    fn from(acquired: AcquiredJob) -> Self {
        Self {
            request_id: acquired.request_id,
            locked_until: acquired.locked_until.to_rfc3339(),
            plan_id: acquired.plan_id,
            job_id: acquired.job_id,
        }
    }
}

/// PATCH and PUT both acquire or renew the lock.
pub async fn renew_request(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, request_id)): Path<(String, String)>,
) -> ApiResult<Json<RenewedRequest>> {
    let request_id = parse_request_id(&request_id)?;
    let acquired = state
        .scheduler
        .acquire_request(request_id)
        .await
        .map_err(api_error)?;
    Ok(Json(RenewedRequest::from(acquired)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteQuery {
    #[serde(default)]
    pub result: Option<String>,
}

pub async fn complete_request(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, request_id)): Path<(String, String)>,
    Query(query): Query<CompleteQuery>,
) -> ApiResult<StatusCode> {
    let request_id = parse_request_id(&request_id)?;
    state
        .scheduler
        .release_request(request_id, query.result.as_deref())
        .await
        .map_err(api_error)?;
    info!(request_id, result = query.result.as_deref().unwrap_or(""), "job request released");
    Ok(StatusCode::OK)
}

/// The runner's final report for a job, carrying its result and step
/// outputs. Unknown jobs are logged, never rejected.
pub async fn finish_job(
    State(state): State<Arc<AppState>>,
    Path((_scope_id, _hub_name, plan_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Json<Value> {
    let body: Value = serde_json::from_slice(&body).unwrap_or_default();
    let result = body.get("result").and_then(Value::as_str).unwrap_or("");
    let job_id = body
        .get("jobId")
        .and_then(Value::as_str)
        .and_then(|id| id.parse::<JobId>().ok());
    let step_outputs = extract_output_variables(&body["outputVariables"]);

    match state
        .scheduler
        .finish_job(plan_id.parse().ok(), job_id, result, &step_outputs)
        .await
    {
        Ok(job_id) => info!(%job_id, %plan_id, result, "job finished"),
        Err(e) => warn!(%plan_id, error = %e, "could not find job for finish"),
    }
    Json(json!({ "status": "ok" }))
}

pub async fn job_events(Path(plan_id): Path<String>) -> StatusCode {
    debug!(%plan_id, "plan event");
    StatusCode::OK
}

/// Runner telemetry; accepted and dropped.
pub async fn telemetry() -> StatusCode {
    StatusCode::OK
}

/// Task definitions are never served.
pub async fn get_task(Path((task_id, version)): Path<(String, String)>) -> StatusCode {
    debug!(%task_id, %version, "task lookup");
    StatusCode::NOT_FOUND
}
