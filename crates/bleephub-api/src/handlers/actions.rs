//! Action resolution for `uses:` steps and the tarball proxy behind it.

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::ServerUrl;
use crate::error::{ApiResult, api_error};
use crate::state::AppState;

const UNRESOLVED_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Default, Deserialize)]
pub struct ActionReferenceList {
    #[serde(default)]
    pub actions: Vec<ActionReference>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReference {
    #[serde(default)]
    pub name_with_owner: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAuthentication {
    pub token: &'static str,
    pub expires_at: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDownloadInfo {
    pub name_with_owner: String,
    pub resolved_name_with_owner: String,
    pub resolved_sha: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub tarball_url: String,
    pub zipball_url: String,
    pub authentication: DownloadAuthentication,
}

#[derive(Debug, Default, Serialize)]
pub struct ActionDownloadInfoCollection {
    pub actions: BTreeMap<String, ActionDownloadInfo>,
}

/// Point every requested action at our own tarball proxy.
pub async fn download_info(
    State(state): State<Arc<AppState>>,
    ServerUrl(server_url): ServerUrl,
    body: Bytes,
) -> Json<ActionDownloadInfoCollection> {
    let request: ActionReferenceList = serde_json::from_slice(&body).unwrap_or_default();
    let mut collection = ActionDownloadInfoCollection::default();

    for action in request.actions {
        let resolved_sha = state
            .actions
            .resolved_sha(&action.name_with_owner, &action.git_ref)
            .await
            .unwrap_or_else(|| UNRESOLVED_SHA.to_string());
        let tarball_url = format!(
            "{server_url}/_apis/v1/actions/tarball/{}/{}",
            action.name_with_owner, action.git_ref
        );
        let info = ActionDownloadInfo {
            name_with_owner: action.name_with_owner.clone(),
            resolved_name_with_owner: action.name_with_owner.clone(),
            resolved_sha,
            git_ref: action.git_ref.clone(),
            zipball_url: tarball_url.clone(),
            tarball_url,
            authentication: DownloadAuthentication {
                token: "x-access-token",
                expires_at: "2099-01-01T00:00:00Z",
            },
        };
        collection.actions.insert(
            format!("{}@{}", action.name_with_owner, action.git_ref),
            info,
        );
    }

    debug!(count = collection.actions.len(), "action download info");
    Json(collection)
}

/// Serve an action tarball from cache, fetching it upstream on a miss.
pub async fn tarball(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, git_ref)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let name_with_owner = format!("{owner}/{repo}");
    let tarball = state
        .actions
        .tarball(&name_with_owner, &git_ref)
        .await
        .map_err(api_error)?;
    let body = Body::from(tarball.bytes.as_ref().clone());
    Ok(([(header::CONTENT_TYPE, "application/gzip")], body).into_response())
}
