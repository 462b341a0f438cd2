//! Timeline, log and console traffic from running jobs.
//!
//! Nothing here is persisted: records and log lines are accepted, traced and
//! acknowledged in the shapes the runner waits for.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::agents::ListEnvelope;
use crate::error::{ApiResult, bad_request};
use crate::state::AppState;

/// Accept a bare array or a `{"value": [...]}` wrapper.
fn unwrap_list(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut fields) => match fields.remove("value") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn field<'a>(record: &'a Value, name: &str) -> &'a str {
    record.get(name).and_then(Value::as_str).unwrap_or("")
}

/// Create or update a timeline. The id is echoed back; the body is ignored.
pub async fn create_timeline(Path(params): Path<HashMap<String, String>>) -> Json<Value> {
    let timeline_id = params.get("timeline_id").cloned().unwrap_or_default();
    debug!(%timeline_id, "timeline upsert");
    Json(json!({ "id": timeline_id, "changeId": 1 }))
}

pub async fn update_records(
    Path((_scope_id, _hub_name, _plan_id, timeline_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Json<ListEnvelope<Value>> {
    let records = serde_json::from_slice(&body)
        .ok()
        .and_then(unwrap_list)
        .unwrap_or_default();
    for record in &records {
        info!(
            %timeline_id,
            name = field(record, "name"),
            state = field(record, "state"),
            result = field(record, "result"),
            "timeline record"
        );
    }
    Json(ListEnvelope::from(records))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFile {
    pub id: String,
    pub path: String,
    pub created_on: String,
    pub line_count: usize,
}

impl LogFile {
    fn new(id: impl ToString, line_count: usize) -> Self {
        let id = id.to_string();
        Self {
            path: format!("logs/{id}"),
            id,
            created_on: Utc::now().to_rfc3339(),
            line_count,
        }
    }
}

pub async fn create_log(
    State(state): State<Arc<AppState>>,
    Path(_params): Path<HashMap<String, String>>,
) -> Json<LogFile> {
    let log_id = state.scheduler.allocate_log_id().await;
    debug!(log_id, "log container created");
    Json(LogFile::new(log_id, 0))
}

pub async fn upload_log(
    Path((_scope_id, _hub_name, _plan_id, log_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Json<LogFile> {
    let content = String::from_utf8_lossy(&body);
    let line_count = content.lines().count();
    info!(%log_id, line_count, "log upload");
    for line in content.lines() {
        debug!(%log_id, line, "log");
    }
    Json(LogFile::new(log_id, line_count))
}

#[derive(Debug, Serialize)]
pub struct ConsoleAck {
    pub count: usize,
}

pub async fn web_console_log(
    Path(params): Path<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Json<ConsoleAck>> {
    let record_id = params.get("record_id").map(String::as_str).unwrap_or("");
    let lines = serde_json::from_slice(&body)
        .ok()
        .and_then(unwrap_list)
        .ok_or_else(|| bad_request("expected an array of console lines"))?;

    for line in &lines {
        info!(record_id, line = line.as_str().unwrap_or_default(), "console");
    }
    Ok(Json(ConsoleAck { count: lines.len() }))
}

pub async fn attachment(Path(params): Path<HashMap<String, String>>) -> Json<Value> {
    debug!(
        kind = params.get("kind").map(String::as_str).unwrap_or(""),
        name = params.get("name").map(String::as_str).unwrap_or(""),
        "timeline attachment"
    );
    Json(json!({ "status": "ok" }))
}
