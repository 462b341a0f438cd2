//! End-to-end test infrastructure for bleephub.
//!
//! Starts the real router in-process on an ephemeral port and drives it
//! over HTTP, both as a tenant and as a runner.
//!
//! ```ignore
//! use bleephub_tests::{RunnerClient, start_test_server};
//!
//! #[tokio::test]
//! async fn runs_a_job() {
//!     let server = start_test_server().await.unwrap();
//!     let runner = RunnerClient::connect(&server.client, "runner-1").await.unwrap();
//!     // submit, poll, acquire, finish ...
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,bleephub_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
