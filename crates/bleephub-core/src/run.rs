//! Runtime model: workflows, their jobs, dispatched jobs and runner messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::{JobId, PlanId, SessionId, TimelineId, WorkflowId};
use crate::workflow::{Combination, ConcurrencyDef, JobDef, value_to_string};

/// Reserved workflow env key holding the base URL runners reach us on.
pub const SERVER_URL_KEY: &str = "__serverURL";
/// Reserved workflow env key holding the fallback job image.
pub const DEFAULT_IMAGE_KEY: &str = "__defaultImage";

pub const MESSAGE_TYPE_JOB_REQUEST: &str = "PipelineAgentJobRequest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    PendingConcurrency,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Skipped)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowStatus::PendingConcurrency => "pending_concurrency",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
        })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a job or workflow.
///
/// Runner result strings outside the known set are kept verbatim in
/// `Other` so they surface unchanged in snapshots and the needs context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunResult {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Other(String),
}

impl RunResult {
    /// Map a result reported by the runner onto the canonical vocabulary.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "" | "Succeeded" | "succeeded" => RunResult::Success,
            "Failed" | "failed" => RunResult::Failure,
            "Cancelled" | "cancelled" => RunResult::Cancelled,
            other => RunResult::from(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunResult::Success => "success",
            RunResult::Failure => "failure",
            RunResult::Cancelled => "cancelled",
            RunResult::Skipped => "skipped",
            RunResult::Other(s) => s,
        }
    }

    /// Results that let dependents run without a status function.
    pub fn is_success_like(&self) -> bool {
        matches!(self, RunResult::Success | RunResult::Skipped)
    }

    /// Results that fail the workflow and trigger fail-fast.
    pub fn is_failure_like(&self) -> bool {
        matches!(self, RunResult::Failure | RunResult::Cancelled)
    }
}

impl From<String> for RunResult {
    fn from(value: String) -> Self {
        match value.as_str() {
            "success" => RunResult::Success,
            "failure" => RunResult::Failure,
            "cancelled" => RunResult::Cancelled,
            "skipped" => RunResult::Skipped,
            _ => RunResult::Other(value),
        }
    }
}

impl From<RunResult> for String {
    fn from(value: RunResult) -> Self {
        match value {
            RunResult::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render an optional result the way clients expect: empty while unset.
pub fn result_str(result: Option<&RunResult>) -> &str {
    result.map(RunResult::as_str).unwrap_or("")
}

/// Event metadata attached to a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_name: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub repository: String,
}

impl Default for EventMeta {
    fn default() -> Self {
        Self {
            event_name: "push".to_string(),
            git_ref: "refs/heads/main".to_string(),
            sha: "0".repeat(40),
            repository: "bleephub/test".to_string(),
        }
    }
}

impl EventMeta {
    pub fn repository_owner(&self) -> &str {
        self.repository
            .split_once('/')
            .map(|(owner, _)| owner)
            .unwrap_or(self.repository.as_str())
    }
}

/// A submitted workflow and the state of every job in it.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub run_id: u64,
    pub run_number: u64,
    pub event: EventMeta,
    pub inputs: BTreeMap<String, String>,
    pub status: WorkflowStatus,
    pub result: Option<RunResult>,
    /// Representative matrix limit; per-group limits come from each job's strategy.
    pub max_parallel: u32,
    pub env: BTreeMap<String, String>,
    pub jobs: BTreeMap<String, WorkflowJob>,
    pub concurrency: Option<ConcurrencyDef>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn server_url(&self) -> &str {
        self.env.get(SERVER_URL_KEY).map(String::as_str).unwrap_or("")
    }

    pub fn default_image(&self) -> Option<&str> {
        self.env
            .get(DEFAULT_IMAGE_KEY)
            .map(String::as_str)
            .filter(|image| !image.is_empty())
    }

    pub fn concurrency_group(&self) -> Option<&str> {
        self.concurrency
            .as_ref()
            .map(|c| c.group.as_str())
            .filter(|group| !group.is_empty())
    }

    pub fn cancel_in_progress(&self) -> bool {
        self.concurrency
            .as_ref()
            .is_some_and(|c| c.cancel_in_progress)
    }

    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn job_by_id(&self, job_id: JobId) -> Option<&WorkflowJob> {
        self.jobs.values().find(|job| job.job_id == job_id)
    }

    /// Workflow env without the engine's reserved keys.
    pub fn user_env(&self) -> impl Iterator<Item = (&String, &String)> {
        self.env.iter().filter(|(key, _)| !key.starts_with("__"))
    }
}

/// One vertex of a workflow's job graph.
#[derive(Debug, Clone)]
pub struct WorkflowJob {
    pub key: String,
    pub job_id: JobId,
    pub display_name: String,
    pub needs: Vec<String>,
    /// Base key when expanded from a matrix.
    pub matrix_group: Option<String>,
    pub matrix: Combination,
    pub status: JobStatus,
    pub result: Option<RunResult>,
    pub continue_on_error: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub outputs: BTreeMap<String, String>,
    pub def: JobDef,
}

impl WorkflowJob {
    /// Mark the job finished with the given result.
    pub fn finish(&mut self, result: RunResult) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
    }

    pub fn skip(&mut self) {
        self.status = JobStatus::Skipped;
        self.result = Some(RunResult::Skipped);
    }

    pub fn matrix_strings(&self) -> BTreeMap<String, String> {
        self.matrix
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect()
    }
}

/// The runner-facing record of a dispatched job.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    pub request_id: u64,
    pub plan_id: PlanId,
    pub timeline_id: TimelineId,
    pub status: JobStatus,
    pub result: Option<RunResult>,
    /// Serialized job request envelope, served verbatim to the runner.
    pub message: String,
    pub locked_until: DateTime<Utc>,
}

/// The message wrapper a long-polling runner receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentMessage {
    pub message_id: u64,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    pub body: String,
}

impl TaskAgentMessage {
    pub fn job_request(message_id: u64, body: String) -> Self {
        Self {
            message_id,
            message_type: MESSAGE_TYPE_JOB_REQUEST.to_string(),
            iv: None,
            body,
        }
    }
}

/// Agent descriptor a runner presents when opening a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAgent {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_agent_status")]
    pub status: String,
}

fn default_enabled() -> bool {
    true
}

fn default_agent_status() -> String {
    "online".to_string()
}

/// Session metadata as reported back to the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub owner_name: String,
    pub agent: SessionAgent,
    pub encryption_key: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalizes_runner_results() {
        assert_eq!(RunResult::normalize("Succeeded"), RunResult::Success);
        assert_eq!(RunResult::normalize("succeeded"), RunResult::Success);
        assert_eq!(RunResult::normalize(""), RunResult::Success);
        assert_eq!(RunResult::normalize("Failed"), RunResult::Failure);
        assert_eq!(RunResult::normalize("failed"), RunResult::Failure);
        assert_eq!(RunResult::normalize("Cancelled"), RunResult::Cancelled);
        assert_eq!(
            RunResult::normalize("Abandoned"),
            RunResult::Other("Abandoned".into())
        );
        assert_eq!(RunResult::normalize("success"), RunResult::Success);
    }

    #[test]
    fn only_failure_and_cancelled_are_failure_like() {
        assert!(RunResult::Failure.is_failure_like());
        assert!(RunResult::Cancelled.is_failure_like());
        assert!(!RunResult::Other("SucceededWithIssues".into()).is_failure_like());
        assert!(!RunResult::Skipped.is_failure_like());
    }

    #[test]
    fn results_serialize_as_plain_strings() {
        let json = serde_json::to_string(&vec![
            RunResult::Success,
            RunResult::Other("Abandoned".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"["success","Abandoned"]"#);
        assert_eq!(result_str(None), "");
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::PendingConcurrency).unwrap(),
            r#""pending_concurrency""#
        );
        assert_eq!(WorkflowStatus::PendingConcurrency.to_string(), "pending_concurrency");
        assert_eq!(JobStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn event_defaults() {
        let meta = EventMeta::default();
        assert_eq!(meta.event_name, "push");
        assert_eq!(meta.git_ref, "refs/heads/main");
        assert_eq!(meta.sha.len(), 40);
        assert_eq!(meta.repository_owner(), "bleephub");
    }

    #[test]
    fn task_agent_message_wire_shape() {
        let msg = TaskAgentMessage::job_request(7, "{}".into());
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"messageId":7,"messageType":"PipelineAgentJobRequest","body":"{}"}"#
        );
    }
}
