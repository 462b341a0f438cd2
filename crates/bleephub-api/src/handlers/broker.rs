//! Runner sessions and the long-poll message endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bleephub_core::ids::SessionId;
use bleephub_core::run::{SessionAgent, SessionInfo};
use bleephub_scheduler::POLL_TIMEOUT;
use bleephub_trace::spans::session_span;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{Instrument, debug};

use crate::error::{ApiResult, api_error, not_found};
use crate::state::AppState;

/// Owner and agent from a session request. Anything missing defaults.
fn session_request(body: &[u8]) -> (String, SessionAgent) {
    let raw: Value = serde_json::from_slice(body).unwrap_or_default();
    let owner_name = raw
        .get("ownerName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut agent: SessionAgent = raw
        .get("agent")
        .cloned()
        .and_then(|agent| serde_json::from_value(agent).ok())
        .unwrap_or_default();
    agent.enabled = true;
    agent.status = "online".to_string();
    (owner_name, agent)
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Path(_pool_id): Path<String>,
    body: Bytes,
) -> Json<SessionInfo> {
    let (owner_name, agent) = session_request(&body);
    Json(state.scheduler.create_session(owner_name, agent).await)
}

/// Always succeeds; deleting an unknown session is not an error to the runner.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path((_pool_id, session_id)): Path<(String, String)>,
) -> StatusCode {
    if let Ok(session_id) = session_id.parse::<SessionId>() {
        if let Err(e) = state.scheduler.delete_session(session_id).await {
            debug!(error = %e, "session already gone");
        }
    }
    StatusCode::OK
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    #[serde(default)]
    pub session_id: String,
}

/// Long-poll: a job envelope, or an empty 200 once the poll times out.
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(_pool_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Response> {
    let session_id: SessionId = query
        .session_id
        .parse()
        .map_err(|_| not_found("session"))?;

    let message = state
        .scheduler
        .poll_message(session_id, POLL_TIMEOUT)
        .instrument(session_span(&query.session_id, "poll"))
        .await
        .map_err(api_error)?;

    Ok(match message {
        Some(message) => {
            debug!(%session_id, message_id = message.message_id, "message delivered");
            Json(message).into_response()
        }
        None => StatusCode::OK.into_response(),
    })
}

/// Acknowledgement of a delivered message. Delivery already dequeued it.
pub async fn delete_message(Path((_pool_id, message_id)): Path<(String, String)>) -> StatusCode {
    debug!(%message_id, "message acknowledged");
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn session_request_forces_the_agent_online() {
        let body = br#"{
            "ownerName": "host-1",
            "agent": {"id": 3, "name": "runner-1", "version": "2.321.0", "enabled": false, "status": "offline"}
        }"#;
        let (owner, agent) = session_request(body);
        assert_eq!(owner, "host-1");
        assert_eq!(agent.id, 3);
        assert_eq!(agent.name, "runner-1");
        assert!(agent.enabled);
        assert_eq!(agent.status, "online");
    }

    #[test]
    fn empty_session_request_still_opens() {
        let (owner, agent) = session_request(b"");
        assert_eq!(owner, "");
        assert_eq!(agent.name, "");
        assert!(agent.enabled);
    }
}
