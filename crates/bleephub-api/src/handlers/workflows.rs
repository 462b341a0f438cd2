//! Tenant control plane: workflow submission, snapshots and cancellation,
//! plus the single-job submit shortcut.

use axum::{
    Json,
    extract::{Path, State},
};
use bleephub_core::ids::{JobId, WorkflowId};
use bleephub_core::run::{EventMeta, JobStatus, Workflow, WorkflowJob, WorkflowStatus, result_str};
use bleephub_core::workflow::{StepDef, parse_workflow, value_to_string};
use bleephub_scheduler::{JobSnapshot, Submission};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::ServerUrl;
use crate::error::{ApiResult, api_error, not_found};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkflowRequest {
    /// Workflow YAML.
    pub workflow: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl SubmitWorkflowRequest {
    fn event(&self) -> EventMeta {
        let defaults = EventMeta::default();
        let pick = |value: &Option<String>, fallback: String| {
            value.clone().filter(|v| !v.is_empty()).unwrap_or(fallback)
        };
        EventMeta {
            event_name: pick(&self.event_name, defaults.event_name),
            git_ref: pick(&self.git_ref, defaults.git_ref),
            sha: pick(&self.sha, defaults.sha),
            repository: pick(&self.repository, defaults.repository),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkflowResponse {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub jobs: BTreeMap<String, SubmittedJob>,
}

impl From<&Workflow> for SubmitWorkflowResponse {
    fn from(wf: &Workflow) -> Self {
        Self {
            workflow_id: wf.id,
            status: wf.status,
            jobs: wf
                .jobs
                .iter()
                .map(|(key, job)| {
                    let submitted = SubmittedJob {
                        job_id: job.job_id,
                        status: job.status,
                        name: job.display_name.clone(),
                    };
                    (key.clone(), submitted)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowJobResponse {
    pub key: String,
    pub job_id: JobId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    pub status: JobStatus,
    pub result: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub matrix: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix_group: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl From<&WorkflowJob> for WorkflowJobResponse {
    fn from(job: &WorkflowJob) -> Self {
        Self {
            key: job.key.clone(),
            job_id: job.job_id,
            display_name: job.display_name.clone(),
            needs: job.needs.clone(),
            status: job.status,
            result: result_str(job.result.as_ref()).to_string(),
            outputs: job.outputs.clone(),
            matrix: job.matrix.clone(),
            matrix_group: job.matrix_group.clone(),
            continue_on_error: job.continue_on_error,
            started_at: job.started_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    pub id: WorkflowId,
    pub name: String,
    pub run_id: u64,
    pub run_number: u64,
    pub status: WorkflowStatus,
    pub result: String,
    pub created_at: String,
    pub event_name: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub repo_full_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_group: Option<String>,
    pub jobs: BTreeMap<String, WorkflowJobResponse>,
}

impl From<&Workflow> for WorkflowResponse {
    fn from(wf: &Workflow) -> Self {
        Self {
            id: wf.id,
            name: wf.name.clone(),
            run_id: wf.run_id,
            run_number: wf.run_number,
            status: wf.status,
            result: result_str(wf.result.as_ref()).to_string(),
            created_at: wf.created_at.to_rfc3339(),
            event_name: wf.event.event_name.clone(),
            git_ref: wf.event.git_ref.clone(),
            sha: wf.event.sha.clone(),
            repo_full_name: wf.event.repository.clone(),
            inputs: wf.inputs.clone(),
            concurrency_group: wf.concurrency_group().map(str::to_owned),
            jobs: wf
                .jobs
                .iter()
                .map(|(key, job)| (key.clone(), WorkflowJobResponse::from(job)))
                .collect(),
        }
    }
}

fn parse_workflow_id(id: &str) -> ApiResult<WorkflowId> {
    id.parse().map_err(|_| not_found("workflow"))
}

pub async fn submit_workflow(
    State(state): State<Arc<AppState>>,
    ServerUrl(server_url): ServerUrl,
    Json(request): Json<SubmitWorkflowRequest>,
) -> ApiResult<Json<SubmitWorkflowResponse>> {
    let definition = parse_workflow(&request.workflow).map_err(api_error)?;
    let submission = Submission {
        event: request.event(),
        inputs: request
            .inputs
            .iter()
            .map(|(name, value)| (name.clone(), value_to_string(value)))
            .collect(),
        default_image: request.image,
        ..Submission::new(definition, server_url)
    };

    let workflow = state.scheduler.submit(submission).await.map_err(api_error)?;
    info!(workflow_id = %workflow.id, status = %workflow.status, "workflow accepted");
    Ok(Json(SubmitWorkflowResponse::from(&workflow)))
}

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowResponse>> {
    let id = parse_workflow_id(&id)?;
    let workflow = state.scheduler.workflow(id).await.map_err(api_error)?;
    Ok(Json(WorkflowResponse::from(&workflow)))
}

pub async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowResponse>> {
    let id = parse_workflow_id(&id)?;
    let workflow = state
        .scheduler
        .cancel_workflow(id)
        .await
        .map_err(api_error)?;
    Ok(Json(WorkflowResponse::from(&workflow)))
}

// === Single-job submit ===

#[derive(Debug, Default, Deserialize)]
pub struct SubmitStep {
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

impl From<SubmitStep> for StepDef {
    fn from(step: SubmitStep) -> Self {
        StepDef {
            run: step.run.filter(|r| !r.is_empty()),
            uses: step.uses.filter(|u| !u.is_empty()),
            name: step.name,
            shell: step.shell,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub steps: Vec<SubmitStep>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    pub request_id: u64,
    pub status: JobStatus,
    pub result: String,
}

impl From<JobSnapshot> for JobResponse {
    fn from(job: JobSnapshot) -> Self {
        Self {
            job_id: job.job_id,
            workflow_id: job.workflow_id,
            request_id: job.request_id,
            status: job.status,
            result: result_str(job.result.as_ref()).to_string(),
        }
    }
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    ServerUrl(server_url): ServerUrl,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<Json<JobResponse>> {
    let steps = request.steps.into_iter().map(StepDef::from).collect();
    let job = state
        .scheduler
        .submit_steps(request.image, steps, server_url)
        .await
        .map_err(api_error)?;
    info!(job_id = %job.job_id, request_id = job.request_id, "job submitted");
    Ok(Json(JobResponse::from(job)))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job_id: JobId = job_id.parse().map_err(|_| not_found("job"))?;
    let job = state.scheduler.job_status(job_id).await.map_err(api_error)?;
    Ok(Json(JobResponse::from(job)))
}
