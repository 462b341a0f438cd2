//! Repository Actions secrets.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use bleephub_core::Error;
use bleephub_scheduler::secrets::{Secret, SecretWrite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiResult, api_error, bad_request};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SecretResponse {
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Secret> for SecretResponse {
    fn from(secret: &Secret) -> Self {
        Self {
            name: secret.name.clone(),
            created_at: secret.created_at.to_rfc3339(),
            updated_at: secret.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListSecretsResponse {
    pub total_count: usize,
    pub secrets: Vec<SecretResponse>,
}

/// Either a plain value or a client-sealed one; sealed values are stored as sent.
#[derive(Debug, Default, Deserialize)]
pub struct PutSecretRequest {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub encrypted_value: Option<String>,
}

pub async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
) -> Json<ListSecretsResponse> {
    let inner = state.scheduler.store().read().await;
    let secrets: Vec<SecretResponse> = inner
        .secrets
        .list(&format!("{owner}/{repo}"))
        .into_iter()
        .map(SecretResponse::from)
        .collect();
    Json(ListSecretsResponse {
        total_count: secrets.len(),
        secrets,
    })
}

pub async fn get_secret(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, name)): Path<(String, String, String)>,
) -> ApiResult<Json<SecretResponse>> {
    let inner = state.scheduler.store().read().await;
    inner
        .secrets
        .get(&format!("{owner}/{repo}"), &name)
        .map(|secret| Json(SecretResponse::from(secret)))
        .ok_or_else(|| api_error(Error::SecretNotFound(name.to_ascii_uppercase())))
}

pub async fn put_secret(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, name)): Path<(String, String, String)>,
    body: axum::body::Bytes,
) -> ApiResult<StatusCode> {
    let request: PutSecretRequest =
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid JSON: {e}")))?;
    let value = request
        .value
        .or(request.encrypted_value)
        .unwrap_or_default();

    let write = state
        .scheduler
        .store()
        .write()
        .await
        .secrets
        .put(&format!("{owner}/{repo}"), &name, value);
    Ok(match write {
        SecretWrite::Created => StatusCode::CREATED,
        SecretWrite::Updated => StatusCode::NO_CONTENT,
    })
}

pub async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, name)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let removed = state
        .scheduler
        .store()
        .write()
        .await
        .secrets
        .delete(&format!("{owner}/{repo}"), &name);
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(Error::SecretNotFound(name.to_ascii_uppercase())))
    }
}
