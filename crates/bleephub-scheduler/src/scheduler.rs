//! Workflow orchestration: admission, dispatch, completion and cancellation.
//!
//! Every state transition runs under the store's write lock, so a
//! completion, the fail-fast cascade it triggers and the following dispatch
//! pass are atomic with respect to other completions.

use crate::broker::{self, Session};
use crate::dag::validate_job_graph;
use crate::matrix::{ExpandedJob, MatrixExpander};
use crate::message::{DispatchIds, FALLBACK_IMAGE, JobMessageBuilder};
use crate::metrics::SchedulerMetrics;
use crate::store::{Store, StoreInner};

use bleephub_core::expressions::{ExprContext, contains_status_function, eval_expr};
use bleephub_core::ids::{JobId, PlanId, SessionId, TimelineId, WorkflowId};
use bleephub_core::outputs::resolve_job_outputs;
use bleephub_core::run::{
    DEFAULT_IMAGE_KEY, EventMeta, Job, JobStatus, RunResult, SERVER_URL_KEY, SessionAgent,
    SessionInfo, TaskAgentMessage, Workflow, WorkflowJob, WorkflowStatus,
};
use bleephub_core::workflow::{ContainerDef, JobDef, StepDef, WorkflowDef};
use bleephub_core::{Error, Result};
use bleephub_trace::{WorkflowAttributes, job_span, workflow_span};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Job key used by single-job submissions.
pub const SIMPLE_JOB_KEY: &str = "test";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Zero means unlimited.
    pub max_concurrent_workflows: usize,
    /// Applied to jobs without `timeout-minutes`.
    pub default_timeout_minutes: u32,
    pub default_image: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 0,
            default_timeout_minutes: 360,
            default_image: FALLBACK_IMAGE.to_string(),
        }
    }
}

/// Everything a workflow submission carries besides the definition.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub definition: WorkflowDef,
    pub server_url: String,
    pub default_image: Option<String>,
    pub event: EventMeta,
    pub inputs: BTreeMap<String, String>,
}

impl Submission {
    pub fn new(definition: WorkflowDef, server_url: impl Into<String>) -> Self {
        Self {
            definition,
            server_url: server_url.into(),
            ..Default::default()
        }
    }
}

/// A job as seen by the single-job API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    /// Zero until the job is dispatched.
    pub request_id: u64,
    pub status: JobStatus,
    pub result: Option<RunResult>,
}

/// Lock granted to a runner acquiring a job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredJob {
    pub job_id: JobId,
    pub plan_id: PlanId,
    pub timeline_id: TimelineId,
    pub request_id: u64,
    pub locked_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub active_workflows: usize,
    pub jobs_by_status: BTreeMap<String, u64>,
    pub connected_runners: usize,
    pub pending_messages: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Default)]
struct DispatchPlan {
    skip: Vec<String>,
    dispatch: Vec<String>,
}

/// The scheduler service.
pub struct Scheduler {
    store: Arc<Store>,
    metrics: Arc<SchedulerMetrics>,
    config: SchedulerConfig,
    expander: MatrixExpander,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, metrics: Arc<SchedulerMetrics>, config: SchedulerConfig) -> Self {
        Self {
            store,
            metrics,
            config,
            expander: MatrixExpander::new(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Validate, register and admit a workflow, dispatching its root jobs
    /// unless a concurrency group holds it back.
    pub async fn submit(&self, submission: Submission) -> Result<Workflow> {
        let expanded = self.expander.expand_workflow(&submission.definition)?;
        validate_job_graph(&expanded)?;

        let mut inner = self.store.write().await;
        let limit = self.config.max_concurrent_workflows;
        if limit > 0 && inner.running_workflows() >= limit {
            warn!(limit, "rejecting workflow, concurrent limit reached");
            return Err(Error::TooManyWorkflows { limit });
        }

        let run_id = inner.next_run_id();
        let workflow = self.build_workflow(submission, expanded, run_id);
        let workflow_id = workflow.id;
        let attrs = WorkflowAttributes::new()
            .workflow(workflow_id, &workflow.name)
            .run(run_id)
            .vcs(&workflow.event.repository, &workflow.event.git_ref);

        workflow_span(&attrs, "submit").in_scope(|| self.admit(&mut inner, workflow));
        snapshot(&inner, workflow_id)
    }

    /// Wrap bare steps into a one-job workflow and submit it.
    pub async fn submit_steps(
        &self,
        image: Option<String>,
        steps: Vec<StepDef>,
        server_url: impl Into<String>,
    ) -> Result<JobSnapshot> {
        if steps.is_empty() {
            return Err(Error::invalid_job(SIMPLE_JOB_KEY, "no steps"));
        }
        if let Some(index) = steps.iter().position(|s| s.action().is_none()) {
            return Err(Error::invalid_job(
                SIMPLE_JOB_KEY,
                format!("step {index}: must define run or uses"),
            ));
        }

        let image = image.filter(|i| !i.is_empty());
        let job = JobDef {
            name: Some(SIMPLE_JOB_KEY.to_string()),
            runs_on: vec!["self-hosted".to_string()],
            container: image.clone().map(|image| ContainerDef {
                image,
                ..Default::default()
            }),
            steps,
            ..Default::default()
        };
        let definition = WorkflowDef {
            name: "bleephub-submit".to_string(),
            jobs: BTreeMap::from([(SIMPLE_JOB_KEY.to_string(), job)]),
            ..Default::default()
        };

        let workflow = self
            .submit(Submission {
                default_image: image,
                ..Submission::new(definition, server_url)
            })
            .await?;
        let job_id = workflow
            .jobs
            .get(SIMPLE_JOB_KEY)
            .map(|job| job.job_id)
            .ok_or_else(|| Error::JobNotFound(SIMPLE_JOB_KEY.to_string()))?;
        self.job_status(job_id).await
    }

    pub async fn workflow(&self, workflow_id: WorkflowId) -> Result<Workflow> {
        let inner = self.store.read().await;
        snapshot(&inner, workflow_id)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobSnapshot> {
        let inner = self.store.read().await;
        let workflow_id = inner
            .workflow_for_job(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        let job = inner
            .workflows
            .get(&workflow_id)
            .and_then(|wf| wf.job_by_id(job_id))
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        Ok(JobSnapshot {
            job_id,
            workflow_id,
            request_id: inner.jobs.get(&job_id).map(|j| j.request_id).unwrap_or(0),
            status: job.status,
            result: job.result.clone(),
        })
    }

    /// Runner-reported completion of a job.
    pub async fn on_job_completed(&self, job_id: JobId, raw_result: &str) -> Result<()> {
        let mut inner = self.store.write().await;
        self.complete_locked(&mut inner, job_id, RunResult::normalize(raw_result))
    }

    /// Authoritative completion: merge declared outputs, then complete.
    ///
    /// The job is looked up by plan id first and by job id second.
    pub async fn finish_job(
        &self,
        plan_id: Option<PlanId>,
        job_id: Option<JobId>,
        raw_result: &str,
        step_outputs: &BTreeMap<String, String>,
    ) -> Result<JobId> {
        let mut inner = self.store.write().await;
        let job_id = plan_id
            .and_then(|plan_id| inner.job_by_plan_id(plan_id))
            .map(|job| job.job_id)
            .or(job_id)
            .ok_or_else(|| Error::JobNotFound(format!("plan {plan_id:?}")))?;
        let workflow_id = inner
            .workflow_for_job(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        if let Some(job) = inner
            .workflows
            .get_mut(&workflow_id)
            .and_then(|wf| wf.jobs.values_mut().find(|j| j.job_id == job_id))
            .filter(|job| !job.status.is_terminal())
        {
            let resolved = resolve_job_outputs(&job.def.outputs, step_outputs);
            if !resolved.is_empty() {
                debug!(job_key = %job.key, outputs = resolved.len(), "job outputs resolved");
            }
            job.outputs.extend(resolved);
        }

        self.complete_locked(&mut inner, job_id, RunResult::normalize(raw_result))?;
        Ok(job_id)
    }

    /// Cancel a workflow that has not completed yet.
    pub async fn cancel_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow> {
        let mut inner = self.store.write().await;
        let wf = inner
            .workflows
            .get(&workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;
        if wf.is_completed() {
            return Err(Error::WorkflowAlreadyCompleted);
        }
        let attrs = WorkflowAttributes::new().workflow(workflow_id, &wf.name);

        workflow_span(&attrs, "cancel").in_scope(|| {
            if let Some(group) = self.cancel_locked(&mut inner, workflow_id) {
                if let Some(next) = self.promote_next(&mut inner, &group) {
                    self.settle(&mut inner, next);
                }
            }
            inner.sessions.drain_pending();
            self.refresh_gauges(&inner);
        });
        snapshot(&inner, workflow_id)
    }

    /// Cancel jobs that have been queued or running longer than their
    /// timeout. Returns how many timed out.
    pub async fn check_timeouts(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.store.write().await;
        let default_minutes = self.config.default_timeout_minutes;

        let expired: Vec<(JobId, String)> = inner
            .workflows
            .values()
            .filter(|wf| wf.status == WorkflowStatus::Running)
            .flat_map(|wf| wf.jobs.values())
            .filter(|job| job.status.is_active())
            .filter(|job| {
                let minutes = match job.def.timeout_minutes {
                    0 => default_minutes,
                    explicit => explicit,
                };
                minutes > 0
                    && job
                        .started_at
                        .is_some_and(|started| now - started > Duration::minutes(i64::from(minutes)))
            })
            .map(|job| (job.job_id, job.key.clone()))
            .collect();

        for (job_id, key) in &expired {
            warn!(%job_id, job_key = %key, "job timed out, cancelling");
            if let Err(e) = self.complete_locked(&mut inner, *job_id, RunResult::Cancelled) {
                error!(%job_id, error = %e, "failed to cancel timed out job");
            }
        }
        expired.len()
    }

    // === Run service ===

    /// The stored envelope for a request id.
    pub async fn job_message(&self, request_id: u64) -> Result<String> {
        let inner = self.store.read().await;
        inner
            .job_by_request_id(request_id)
            .map(|job| job.message.clone())
            .ok_or(Error::RequestNotFound(request_id))
    }

    pub async fn allocate_log_id(&self) -> u64 {
        self.store.write().await.next_log_id()
    }

    /// Acquire or renew a job request: `queued -> running`, lock for an hour.
    pub async fn acquire_request(&self, request_id: u64) -> Result<AcquiredJob> {
        let mut inner = self.store.write().await;
        let job = inner
            .job_by_request_id_mut(request_id)
            .ok_or(Error::RequestNotFound(request_id))?;
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Running;
        }
        job.locked_until = Utc::now() + Duration::hours(1);
        let acquired = AcquiredJob {
            job_id: job.job_id,
            plan_id: job.plan_id,
            timeline_id: job.timeline_id,
            request_id,
            locked_until: job.locked_until,
        };
        let workflow_id = job.workflow_id;

        if let Some(wf_job) = inner
            .workflows
            .get_mut(&workflow_id)
            .and_then(|wf| wf.jobs.values_mut().find(|j| j.job_id == acquired.job_id))
        {
            if wf_job.status == JobStatus::Queued {
                wf_job.status = JobStatus::Running;
            }
        }
        debug!(request_id, job_id = %acquired.job_id, "job request acquired");
        Ok(acquired)
    }

    /// Runner releases a request. A non-empty result completes the job with
    /// it; otherwise any previously reported result stands.
    pub async fn release_request(&self, request_id: u64, raw_result: Option<&str>) -> Result<()> {
        let mut inner = self.store.write().await;
        let job = inner
            .job_by_request_id_mut(request_id)
            .ok_or(Error::RequestNotFound(request_id))?;
        if job.status.is_terminal() {
            debug!(request_id, status = %job.status, "release of finished request ignored");
            return Ok(());
        }
        if let Some(raw) = raw_result.filter(|r| !r.is_empty()) {
            job.result = Some(RunResult::normalize(raw));
        }
        job.status = JobStatus::Completed;
        let job_id = job.job_id;
        let result = job.result.clone().unwrap_or(RunResult::Success);
        self.complete_locked(&mut inner, job_id, result)
    }

    // === Sessions ===

    pub async fn create_session(&self, owner_name: String, agent: SessionAgent) -> SessionInfo {
        let mut inner = self.store.write().await;
        let info = inner.sessions.open(owner_name, agent);
        self.refresh_gauges(&inner);
        info!(
            session_id = %info.session_id,
            agent = %info.agent.name,
            pending = inner.sessions.pending_len(),
            "runner session created"
        );
        info
    }

    pub async fn session(&self, session_id: SessionId) -> Result<SessionInfo> {
        let inner = self.store.read().await;
        inner
            .sessions
            .get(session_id)
            .map(|session| session.info.clone())
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub async fn delete_session(&self, session_id: SessionId) -> Result<()> {
        let mut inner = self.store.write().await;
        inner
            .sessions
            .close(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        self.refresh_gauges(&inner);
        info!(%session_id, "runner session deleted");
        Ok(())
    }

    /// Long-poll a session. The store lock is released before waiting.
    pub async fn poll_message(
        &self,
        session_id: SessionId,
        timeout: std::time::Duration,
    ) -> Result<Option<TaskAgentMessage>> {
        let receiver = {
            let inner = self.store.read().await;
            inner
                .sessions
                .get(session_id)
                .map(Session::receiver)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?
        };
        Ok(broker::poll_message(receiver, timeout).await)
    }

    // === Introspection ===

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let inner = self.store.read().await;
        let mut jobs_by_status = BTreeMap::new();
        for job in inner.workflows.values().flat_map(|wf| wf.jobs.values()) {
            *jobs_by_status.entry(job.status.to_string()).or_insert(0) += 1;
        }
        StatusSnapshot {
            active_workflows: inner.active_workflows(),
            jobs_by_status,
            connected_runners: inner.sessions.len(),
            pending_messages: inner.sessions.pending_len(),
            uptime_seconds: self.metrics.uptime_seconds(),
        }
    }

    // === Locked internals ===

    fn build_workflow(
        &self,
        submission: Submission,
        expanded: BTreeMap<String, ExpandedJob>,
        run_id: u64,
    ) -> Workflow {
        let Submission {
            definition,
            server_url,
            default_image,
            event,
            inputs,
        } = submission;

        let mut env = definition.env;
        env.insert(SERVER_URL_KEY.to_string(), server_url);
        env.insert(
            DEFAULT_IMAGE_KEY.to_string(),
            default_image
                .filter(|image| !image.is_empty())
                .unwrap_or_else(|| self.config.default_image.clone()),
        );

        let max_parallel = expanded
            .values()
            .filter(|job| job.matrix_group.is_some())
            .map(|job| job.def.max_parallel())
            .find(|limit| *limit > 0)
            .unwrap_or(0);

        let jobs = expanded
            .into_values()
            .map(|job| {
                let wf_job = WorkflowJob {
                    key: job.key.clone(),
                    job_id: JobId::new(),
                    display_name: job.display_name,
                    needs: job.needs,
                    matrix_group: job.matrix_group,
                    matrix: job.matrix,
                    status: JobStatus::Pending,
                    result: None,
                    continue_on_error: job.def.continue_on_error,
                    started_at: None,
                    outputs: BTreeMap::new(),
                    def: job.def,
                };
                (job.key, wf_job)
            })
            .collect();

        Workflow {
            id: WorkflowId::new(),
            name: definition.name,
            run_id,
            run_number: run_id,
            event,
            inputs,
            status: WorkflowStatus::Running,
            result: None,
            max_parallel,
            env,
            jobs,
            concurrency: definition.concurrency,
            created_at: Utc::now(),
        }
    }

    /// Concurrency-group admission, then the first dispatch pass.
    fn admit(&self, inner: &mut StoreInner, mut workflow: Workflow) {
        let workflow_id = workflow.id;
        let mut held = false;

        if let Some(group) = workflow.concurrency_group().map(str::to_owned) {
            let peers: Vec<(WorkflowId, bool)> = inner
                .workflows
                .values()
                .filter(|peer| !peer.is_completed() && peer.concurrency_group() == Some(group.as_str()))
                .map(|peer| (peer.id, peer.cancel_in_progress()))
                .collect();
            for (peer_id, peer_cancels) in peers {
                if workflow.cancel_in_progress() || peer_cancels {
                    info!(workflow_id = %peer_id, group = %group, "cancelling in-progress workflow");
                    self.cancel_locked(inner, peer_id);
                } else {
                    held = true;
                }
            }
            if held {
                workflow.status = WorkflowStatus::PendingConcurrency;
                info!(%workflow_id, group = %group, "workflow waiting on concurrency group");
            }
        }

        info!(%workflow_id, run_id = workflow.run_id, jobs = workflow.jobs.len(), "workflow submitted");
        inner.workflows.insert(workflow_id, workflow);
        self.metrics.record_submission();
        if !held {
            self.settle(inner, workflow_id);
        }
        self.refresh_gauges(inner);
    }

    /// Dispatch what is ready, finish the workflow when nothing is left and
    /// promote the next workflow of its concurrency group.
    fn settle(&self, inner: &mut StoreInner, workflow_id: WorkflowId) {
        let mut next = Some(workflow_id);
        while let Some(current) = next.take() {
            self.dispatch_ready_jobs(inner, current);
            if let Some(group) = self.complete_if_terminal(inner, current) {
                next = self.promote_next(inner, &group);
            }
        }
        self.refresh_gauges(inner);
    }

    fn dispatch_ready_jobs(&self, inner: &mut StoreInner, workflow_id: WorkflowId) {
        loop {
            let Some(plan) = inner.workflows.get(&workflow_id).map(plan_dispatch) else {
                return;
            };
            if let Some(wf) = inner.workflows.get_mut(&workflow_id) {
                for key in &plan.skip {
                    if let Some(job) = wf.jobs.get_mut(key) {
                        debug!(%workflow_id, job_key = %key, "job skipped");
                        job.skip();
                        self.metrics.record_completion(&RunResult::Skipped);
                    }
                }
            }
            for key in &plan.dispatch {
                self.dispatch_job(inner, workflow_id, key);
            }
            // Skipped jobs are terminal and may unblock their dependents.
            if plan.skip.is_empty() {
                return;
            }
        }
    }

    fn dispatch_job(&self, inner: &mut StoreInner, workflow_id: WorkflowId, key: &str) {
        let ids = DispatchIds {
            plan_id: PlanId::new(),
            timeline_id: TimelineId::new(),
            request_id: inner.next_request_id(),
        };
        let Some(wf) = inner.workflows.get(&workflow_id) else {
            return;
        };
        let Some(job) = wf.jobs.get(key) else {
            return;
        };
        let job_id = job.job_id;
        let span = job_span(
            &WorkflowAttributes::new()
                .workflow(workflow_id, &wf.name)
                .job(key, job_id)
                .request(ids.request_id),
            "dispatch",
        );
        let _entered = span.enter();

        let secrets = inner.secrets.values_for(&wf.event.repository);
        let message = JobMessageBuilder::new(wf, &secrets)
            .with_fallback_image(&self.config.default_image)
            .build(job, ids);
        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to serialize job request");
                if let Some(job) = job_mut(inner, workflow_id, key) {
                    job.finish(RunResult::Failure);
                }
                return;
            }
        };

        let now = Utc::now();
        inner.jobs.insert(
            job_id,
            Job {
                job_id,
                workflow_id,
                request_id: ids.request_id,
                plan_id: ids.plan_id,
                timeline_id: ids.timeline_id,
                status: JobStatus::Queued,
                result: None,
                message: body.clone(),
                locked_until: now,
            },
        );
        if let Some(job) = job_mut(inner, workflow_id, key) {
            job.status = JobStatus::Queued;
            job.started_at = Some(now);
        }

        let message_id = inner.next_message_id();
        let delivered = inner
            .sessions
            .dispatch(TaskAgentMessage::job_request(message_id, body));
        self.metrics.record_dispatch();
        info!(message_id, delivered, "job dispatched");
    }

    fn complete_locked(&self, inner: &mut StoreInner, job_id: JobId, result: RunResult) -> Result<()> {
        let workflow_id = inner
            .workflow_for_job(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.result.get_or_insert_with(|| result.clone());
        }

        let wf = inner
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;
        let job = wf
            .jobs
            .values_mut()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        let span = job_span(
            &WorkflowAttributes::new().workflow(workflow_id, "").job(&job.key, job_id),
            "complete",
        );
        let _entered = span.enter();

        if job.status.is_terminal() {
            debug!(status = %job.status, "ignoring completion of finished job");
            return Ok(());
        }
        job.finish(result.clone());
        self.metrics.record_completion(&result);
        info!(result = %result, "job completed");

        let fail_fast_group = job
            .matrix_group
            .clone()
            .filter(|_| result.is_failure_like() && job.def.fail_fast());

        let mut cancelled = Vec::new();
        if let Some(group) = fail_fast_group {
            for sibling in wf.jobs.values_mut() {
                if sibling.matrix_group.as_deref() == Some(group.as_str())
                    && matches!(sibling.status, JobStatus::Pending | JobStatus::Queued)
                {
                    sibling.finish(RunResult::Cancelled);
                    self.metrics.record_completion(&RunResult::Cancelled);
                    cancelled.push(sibling.job_id);
                }
            }
            if !cancelled.is_empty() {
                info!(group = %group, cancelled = cancelled.len(), "fail-fast cancelled matrix siblings");
            }
        }
        mark_runner_jobs_cancelled(inner, &cancelled);

        self.settle(inner, workflow_id);
        inner.sessions.drain_pending();
        Ok(())
    }

    /// Mark a workflow cancelled. Returns its concurrency group so the
    /// caller can promote a successor.
    fn cancel_locked(&self, inner: &mut StoreInner, workflow_id: WorkflowId) -> Option<String> {
        let wf = inner.workflows.get_mut(&workflow_id)?;
        if wf.is_completed() {
            return None;
        }
        let mut cancelled = Vec::new();
        for job in wf.jobs.values_mut().filter(|job| !job.status.is_terminal()) {
            job.finish(RunResult::Cancelled);
            self.metrics.record_completion(&RunResult::Cancelled);
            cancelled.push(job.job_id);
        }
        wf.status = WorkflowStatus::Completed;
        wf.result = Some(RunResult::Cancelled);
        let group = wf.concurrency_group().map(str::to_owned);
        info!(%workflow_id, jobs = cancelled.len(), "workflow cancelled");

        mark_runner_jobs_cancelled(inner, &cancelled);
        group
    }

    /// Complete a running workflow whose jobs are all terminal. Returns the
    /// concurrency group when one was released.
    fn complete_if_terminal(&self, inner: &mut StoreInner, workflow_id: WorkflowId) -> Option<String> {
        let wf = inner.workflows.get_mut(&workflow_id)?;
        if wf.status != WorkflowStatus::Running || !wf.jobs.values().all(|j| j.status.is_terminal()) {
            return None;
        }
        let failed = wf
            .jobs
            .values()
            .any(|j| j.result.as_ref().is_some_and(RunResult::is_failure_like));
        let result = if failed { RunResult::Failure } else { RunResult::Success };
        info!(%workflow_id, result = %result, "workflow completed");
        wf.status = WorkflowStatus::Completed;
        wf.result = Some(result);
        wf.concurrency_group().map(str::to_owned)
    }

    /// Move the oldest workflow waiting on `group` to running, unless
    /// another workflow of the group still runs.
    fn promote_next(&self, inner: &mut StoreInner, group: &str) -> Option<WorkflowId> {
        let in_group = |wf: &&Workflow| wf.concurrency_group() == Some(group);
        if inner
            .workflows
            .values()
            .filter(in_group)
            .any(|wf| wf.status == WorkflowStatus::Running)
        {
            return None;
        }
        let next = inner
            .workflows
            .values()
            .filter(in_group)
            .filter(|wf| wf.status == WorkflowStatus::PendingConcurrency)
            .min_by_key(|wf| (wf.created_at, wf.run_id))?
            .id;
        let wf = inner.workflows.get_mut(&next)?;
        wf.status = WorkflowStatus::Running;
        info!(workflow_id = %next, group, "workflow promoted from concurrency queue");
        Some(next)
    }

    fn refresh_gauges(&self, inner: &StoreInner) {
        self.metrics.set_active_workflows(inner.active_workflows());
        self.metrics.set_active_sessions(inner.sessions.len());
    }
}

fn snapshot(inner: &StoreInner, workflow_id: WorkflowId) -> Result<Workflow> {
    inner
        .workflows
        .get(&workflow_id)
        .cloned()
        .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))
}

fn job_mut<'a>(inner: &'a mut StoreInner, workflow_id: WorkflowId, key: &str) -> Option<&'a mut WorkflowJob> {
    inner.workflows.get_mut(&workflow_id)?.jobs.get_mut(key)
}

fn mark_runner_jobs_cancelled(inner: &mut StoreInner, job_ids: &[JobId]) {
    for job_id in job_ids {
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.result = Some(RunResult::Cancelled);
        }
    }
}

/// Decide which pending jobs of a running workflow to skip or dispatch.
fn plan_dispatch(wf: &Workflow) -> DispatchPlan {
    let mut plan = DispatchPlan::default();
    if wf.status != WorkflowStatus::Running {
        return plan;
    }
    let base = expression_context(wf);

    let mut eligible = Vec::new();
    for (key, job) in &wf.jobs {
        if job.status != JobStatus::Pending {
            continue;
        }
        let Some(deps) = job
            .needs
            .iter()
            .map(|dep| wf.jobs.get(dep))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        if !deps.iter().all(|dep| dep.status.is_terminal()) {
            continue;
        }

        let mut ctx = base.clone();
        let mut any_dep_failed = false;
        for dep in deps {
            let result = dep.result.clone().unwrap_or(RunResult::Success);
            // continue-on-error deps gate like successes; status functions
            // still see their real result.
            any_dep_failed |= !dep.continue_on_error && !result.is_success_like();
            ctx.dep_results.insert(dep.key.clone(), result);
        }

        let runs = match job.def.if_expr.as_deref().filter(|e| !e.trim().is_empty()) {
            None => !any_dep_failed,
            Some(expr) if any_dep_failed && !contains_status_function(expr) => false,
            Some(expr) => eval_expr(expr, &ctx),
        };
        if runs {
            eligible.push(job);
        } else {
            plan.skip.push(key.clone());
        }
    }

    eligible.sort_by_key(|job| dispatch_order(job));
    let mut in_flight: HashMap<&str, u32> = HashMap::new();
    for job in eligible {
        if let Some(group) = job.matrix_group.as_deref() {
            let limit = job.def.max_parallel();
            if limit > 0 {
                let active = in_flight.entry(group).or_insert_with(|| {
                    let count = wf
                        .jobs
                        .values()
                        .filter(|j| j.matrix_group.as_deref() == Some(group) && j.status.is_active())
                        .count();
                    u32::try_from(count).unwrap_or(u32::MAX)
                });
                if *active >= limit {
                    continue;
                }
                *active += 1;
            }
        }
        plan.dispatch.push(job.key.clone());
    }
    plan
}

/// Matrix cells dispatch in cell order (`test_2` before `test_10`).
fn dispatch_order(job: &WorkflowJob) -> (&str, usize) {
    match job.matrix_group.as_deref() {
        Some(group) => {
            let index = job
                .key
                .strip_prefix(group)
                .and_then(|rest| rest.strip_prefix('_'))
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            (group, index)
        }
        None => (job.key.as_str(), 0),
    }
}

fn expression_context(wf: &Workflow) -> ExprContext {
    let mut ctx = ExprContext {
        workflow_cancelled: wf.result == Some(RunResult::Cancelled),
        ..Default::default()
    }
    .with_value("github.event_name", wf.event.event_name.as_str())
    .with_value("github.ref", wf.event.git_ref.as_str())
    .with_value("github.sha", wf.event.sha.as_str())
    .with_value("github.repository", wf.event.repository.as_str());
    for (name, value) in &wf.inputs {
        ctx = ctx.with_value(format!("inputs.{name}"), value.as_str());
    }
    ctx
}
