//! HTTP API server for bleephub.
//!
//! Serves two audiences from one router: tenants submitting and inspecting
//! workflows, and Actions runners speaking the broker/run-service protocol.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::{build_app, create_router};
pub use state::AppState;
