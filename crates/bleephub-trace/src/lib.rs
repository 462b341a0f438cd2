//! Logging and OpenTelemetry integration for bleephub.
//!
//! Installs the process-wide subscriber (env filter plus fmt output, with
//! OTLP export when an endpoint is configured) and provides span helpers
//! for workflow and job operations.

pub mod spans;
pub mod tracer;

pub use spans::{WorkflowAttributes, job_span, session_span, workflow_span};
pub use tracer::{OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
