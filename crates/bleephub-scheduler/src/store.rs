//! In-memory state shared by the scheduler, the broker and the HTTP layer.
//!
//! One coarse reader/writer lock guards everything. Session channels are the
//! exception: a poll clones its receiver handle and waits without the lock.

use bleephub_core::ids::{JobId, PlanId, WorkflowId};
use bleephub_core::run::{Job, Workflow, WorkflowStatus};
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::agents::AgentRegistry;
use crate::broker::SessionRegistry;
use crate::secrets::SecretRegistry;

#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().await
    }
}

#[derive(Debug, Default)]
pub struct StoreInner {
    pub workflows: HashMap<WorkflowId, Workflow>,
    /// Runner-facing records of dispatched jobs.
    pub jobs: HashMap<JobId, Job>,
    pub sessions: SessionRegistry,
    pub agents: AgentRegistry,
    pub secrets: SecretRegistry,
    message_seq: u64,
    request_seq: u64,
    log_seq: u64,
    run_seq: u64,
}

impl StoreInner {
    pub fn next_message_id(&mut self) -> u64 {
        self.message_seq += 1;
        self.message_seq
    }

    pub fn next_request_id(&mut self) -> u64 {
        self.request_seq += 1;
        self.request_seq
    }

    pub fn next_log_id(&mut self) -> u64 {
        self.log_seq += 1;
        self.log_seq
    }

    pub fn next_run_id(&mut self) -> u64 {
        self.run_seq += 1;
        self.run_seq
    }

    pub fn job_by_request_id(&self, request_id: u64) -> Option<&Job> {
        self.jobs.values().find(|job| job.request_id == request_id)
    }

    pub fn job_by_request_id_mut(&mut self, request_id: u64) -> Option<&mut Job> {
        self.jobs.values_mut().find(|job| job.request_id == request_id)
    }

    pub fn job_by_plan_id(&self, plan_id: PlanId) -> Option<&Job> {
        self.jobs.values().find(|job| job.plan_id == plan_id)
    }

    /// The workflow owning a job, whether or not it has been dispatched.
    pub fn workflow_for_job(&self, job_id: JobId) -> Option<WorkflowId> {
        if let Some(job) = self.jobs.get(&job_id) {
            return Some(job.workflow_id);
        }
        self.workflows
            .values()
            .find(|wf| wf.job_by_id(job_id).is_some())
            .map(|wf| wf.id)
    }

    /// Workflows that are neither completed nor waiting on a concurrency group.
    pub fn running_workflows(&self) -> usize {
        self.workflows
            .values()
            .filter(|wf| wf.status == WorkflowStatus::Running)
            .count()
    }

    /// Workflows that have not completed.
    pub fn active_workflows(&self) -> usize {
        self.workflows
            .values()
            .filter(|wf| !wf.is_completed())
            .count()
    }
}
