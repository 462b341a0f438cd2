//! Health check and introspection handlers.

use axum::{Json, extract::State};
use bleephub_scheduler::{MetricsSnapshot, StatusSnapshot};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "bleephub",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.scheduler.metrics().snapshot())
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.scheduler.status_snapshot().await)
}
