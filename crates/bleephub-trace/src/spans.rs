//! Span creation for workflow, job and session operations.

use tracing::{Level, Span, span};

/// Attributes attached to scheduler spans.
#[derive(Debug, Clone, Default)]
pub struct WorkflowAttributes {
    pub workflow_id: Option<String>,
    pub workflow_name: Option<String>,
    pub run_id: Option<u64>,
    pub job_key: Option<String>,
    pub job_id: Option<String>,
    pub request_id: Option<u64>,
    pub repository: Option<String>,
    pub git_ref: Option<String>,
}

impl WorkflowAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow(mut self, id: impl ToString, name: impl Into<String>) -> Self {
        self.workflow_id = Some(id.to_string());
        self.workflow_name = Some(name.into());
        self
    }

    pub fn run(mut self, run_id: u64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn job(mut self, key: impl Into<String>, id: impl ToString) -> Self {
        self.job_key = Some(key.into());
        self.job_id = Some(id.to_string());
        self
    }

    pub fn request(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn vcs(mut self, repository: impl Into<String>, git_ref: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self.git_ref = Some(git_ref.into());
        self
    }
}

/// Span for a workflow-level operation such as submit or cancel.
pub fn workflow_span(attrs: &WorkflowAttributes, operation: &str) -> Span {
    span!(
        Level::INFO,
        "workflow",
        operation = operation,
        workflow.id = attrs.workflow_id.as_deref().unwrap_or(""),
        workflow.name = attrs.workflow_name.as_deref().unwrap_or(""),
        workflow.run_id = attrs.run_id.unwrap_or(0),
        vcs.repository = attrs.repository.as_deref().unwrap_or(""),
        vcs.ref = attrs.git_ref.as_deref().unwrap_or(""),
    )
}

/// Span for a job dispatch or completion.
pub fn job_span(attrs: &WorkflowAttributes, operation: &str) -> Span {
    span!(
        Level::INFO,
        "job",
        operation = operation,
        workflow.id = attrs.workflow_id.as_deref().unwrap_or(""),
        job.key = attrs.job_key.as_deref().unwrap_or(""),
        job.id = attrs.job_id.as_deref().unwrap_or(""),
        job.request_id = attrs.request_id.unwrap_or(0),
    )
}

/// Span for runner session traffic.
pub fn session_span(session_id: &str, operation: &str) -> Span {
    span!(
        Level::DEBUG,
        "session",
        operation = operation,
        session.id = session_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn attributes_builder() {
        let attrs = WorkflowAttributes::new()
            .workflow("wf-1", "ci")
            .run(42)
            .job("build", "job-1")
            .request(7)
            .vcs("acme/app", "refs/heads/main");

        assert_eq!(attrs.workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(attrs.run_id, Some(42));
        assert_eq!(attrs.job_key.as_deref(), Some("build"));
        assert_eq!(attrs.request_id, Some(7));
        assert_eq!(attrs.git_ref.as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn spans_can_be_entered_without_a_subscriber() {
        let attrs = WorkflowAttributes::new().workflow("wf", "ci");
        let _guard = workflow_span(&attrs, "submit").entered();
        let _job = job_span(&attrs, "dispatch").entered();
        let _session = session_span("s-1", "poll").entered();
    }
}
