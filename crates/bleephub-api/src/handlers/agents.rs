//! Agent pool and agent registration handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use bleephub_core::Error;
use bleephub_scheduler::Agent;
use bleephub_scheduler::agents::{AgentAuthorization, DEFAULT_POOL_ID, DEFAULT_POOL_NAME};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::ServerUrl;
use crate::error::{ApiResult, api_error, bad_request};
use crate::state::AppState;

/// `{count, value}` envelope the runner expects around collections.
#[derive(Debug, Serialize)]
pub struct ListEnvelope<T> {
    pub count: usize,
    pub value: Vec<T>,
}

impl<T> From<Vec<T>> for ListEnvelope<T> {
    fn from(value: Vec<T>) -> Self {
        Self {
            count: value.len(),
            value,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPool {
    pub id: u64,
    pub name: &'static str,
    pub size: u32,
    pub is_hosted: bool,
    pub pool_type: &'static str,
}

pub async fn list_pools() -> Json<ListEnvelope<AgentPool>> {
    Json(ListEnvelope::from(vec![AgentPool {
        id: DEFAULT_POOL_ID,
        name: DEFAULT_POOL_NAME,
        size: 0,
        is_hosted: false,
        pool_type: "automation",
    }]))
}

/// Decode an agent body, dropping the fields we assign ourselves. Runners
/// send `createdOn` without a zone, which would not parse anyway.
fn agent_from_body(body: &[u8]) -> ApiResult<Agent> {
    let mut raw: Value =
        serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid agent: {e}")))?;
    if let Some(fields) = raw.as_object_mut() {
        fields.remove("createdOn");
        fields.remove("id");
    }
    serde_json::from_value(raw).map_err(|e| bad_request(format!("invalid agent: {e}")))
}

pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    ServerUrl(server_url): ServerUrl,
    Path(_pool_id): Path<u64>,
    body: axum::body::Bytes,
) -> ApiResult<Json<Agent>> {
    let mut agent = agent_from_body(&body)?;
    let authorization = agent.authorization.get_or_insert_with(AgentAuthorization::default);
    authorization.authorization_url = format!("{server_url}/_apis/v1/auth/");
    authorization.client_id = Uuid::new_v4().to_string();

    let agent = state.scheduler.store().write().await.agents.register(agent);
    info!(agent_id = agent.id, name = %agent.name, "agent registered");
    Ok(Json(agent))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQuery {
    #[serde(default)]
    pub agent_name: Option<String>,
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    Path(_pool_id): Path<u64>,
    Query(query): Query<AgentQuery>,
) -> Json<ListEnvelope<Agent>> {
    let name = query.agent_name.as_deref().filter(|n| !n.is_empty());
    let agents = state.scheduler.store().read().await.agents.list(name);
    Json(ListEnvelope::from(agents))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, agent_id)): Path<(u64, u64)>,
) -> ApiResult<Json<Agent>> {
    state
        .scheduler
        .store()
        .read()
        .await
        .agents
        .get(agent_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(Error::AgentNotFound(agent_id)))
}

pub async fn replace_agent(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, agent_id)): Path<(u64, u64)>,
    body: axum::body::Bytes,
) -> ApiResult<Json<Agent>> {
    let update = agent_from_body(&body)?;
    let agent = state
        .scheduler
        .store()
        .write()
        .await
        .agents
        .replace(agent_id, update)
        .ok_or_else(|| api_error(Error::AgentNotFound(agent_id)))?;
    info!(agent_id, name = %agent.name, "agent updated");
    Ok(Json(agent))
}

pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, agent_id)): Path<(u64, u64)>,
) -> ApiResult<StatusCode> {
    state
        .scheduler
        .store()
        .write()
        .await
        .agents
        .remove(agent_id)
        .ok_or_else(|| api_error(Error::AgentNotFound(agent_id)))?;
    info!(agent_id, "agent removed");
    Ok(StatusCode::OK)
}
