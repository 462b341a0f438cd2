//! bleephub scheduler
//!
//! Turns parsed workflows into runner work: matrix expansion, dependency
//! validation, job dispatch through the runner broker, completion handling
//! with fail-fast and concurrency groups, plus the in-memory registries the
//! HTTP layer serves (agents, secrets, action tarballs).

pub mod actions;
pub mod agents;
pub mod broker;
pub mod dag;
pub mod matrix;
pub mod message;
pub mod metrics;
pub mod scheduler;
pub mod secrets;
pub mod store;

pub use actions::{ActionCache, GithubTarballSource, Tarball, TarballSource};
pub use agents::{Agent, AgentRegistry};
pub use broker::{POLL_TIMEOUT, SessionRegistry};
pub use matrix::{ExpandedJob, MatrixExpander};
pub use message::{JobMessageBuilder, JobRequestMessage};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use scheduler::{
    AcquiredJob, JobSnapshot, Scheduler, SchedulerConfig, StatusSnapshot, Submission,
};
pub use secrets::SecretRegistry;
pub use store::{Store, StoreInner};
