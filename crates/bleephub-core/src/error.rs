//! Error types for bleephub.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow parse errors
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("job {job:?}: {message}")]
    InvalidJob { job: String, message: String },

    // Graph errors
    #[error("cycle detected involving job {0:?}")]
    CycleDetected(String),

    #[error("job {job:?} needs unknown job {dependency:?}")]
    UnknownDependency { job: String, dependency: String },

    // Lookup errors
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("request not found: {0}")]
    RequestNotFound(u64),

    #[error("agent not found: {0}")]
    AgentNotFound(u64),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    // State errors
    #[error("workflow already completed")]
    WorkflowAlreadyCompleted,

    #[error("too many concurrent workflows (limit {limit})")]
    TooManyWorkflows { limit: usize },

    // Upstream errors
    #[error("action fetch failed: {0}")]
    ActionFetch(String),

    // Infrastructure errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_job(job: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidJob {
            job: job.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by a malformed workflow submission.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::InvalidWorkflow(_)
                | Error::InvalidJob { .. }
                | Error::CycleDetected(_)
                | Error::UnknownDependency { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::WorkflowNotFound(_)
                | Error::JobNotFound(_)
                | Error::SessionNotFound(_)
                | Error::RequestNotFound(_)
                | Error::AgentNotFound(_)
                | Error::SecretNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidWorkflow(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn graph_errors_name_the_job() {
        let err = Error::UnknownDependency {
            job: "deploy".into(),
            dependency: "bulid".into(),
        };
        assert_eq!(err.to_string(), r#"job "deploy" needs unknown job "bulid""#);
        assert!(err.is_invalid_input());

        let err = Error::CycleDetected("a".into());
        assert_eq!(err.to_string(), r#"cycle detected involving job "a""#);
    }

    #[test]
    fn lookup_errors_are_not_found() {
        assert!(Error::SessionNotFound("x".into()).is_not_found());
        assert!(!Error::WorkflowAlreadyCompleted.is_not_found());
    }
}
