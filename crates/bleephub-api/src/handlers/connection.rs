//! Runner bootstrap: service discovery, registration and OAuth token exchange.

use axum::{Json, body::Bytes};
use bleephub_core::jwt::make_jwt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::ServerUrl;

const SERVICE_OWNER: &str = "00000000-0000-0000-0000-000000000000";
const TOKEN_EXPIRES_IN_SECS: u64 = 604_800;
pub const REGISTRATION_TOKEN: &str = "BLEEPHUB_REG_TOKEN";
const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";

/// `(name, identifier, relative path)` of every service the runner resolves.
const SERVICES: [(&str, &str, &str); 14] = [
    (
        "AgentPools",
        "a8c47e17-4d56-4a56-92bb-de7ea7dc65be",
        "/_apis/v1/AgentPools",
    ),
    (
        "Agent",
        "e298ef32-5878-4cab-993c-043836571f42",
        "/_apis/v1/Agent/{poolId}/{agentId}",
    ),
    (
        "AgentSession",
        "134e239e-2df3-4794-a6f6-24f1f19ec8dc",
        "/_apis/v1/AgentSession/{poolId}/{sessionId}",
    ),
    (
        "Message",
        "c3a054f6-7a8a-49c0-944e-3a8e5d7adfd7",
        "/_apis/v1/Message/{poolId}/{messageId}",
    ),
    (
        "AgentRequest",
        "fc825784-c92a-4299-9221-998a02d1b54f",
        "/_apis/v1/AgentRequest/{poolId}/{requestId}",
    ),
    (
        "FinishJob",
        "557624af-b29e-4c20-8ab0-0399d2204f3f",
        "/_apis/v1/FinishJob/{scopeIdentifier}/{hubName}/{planId}",
    ),
    (
        "Timeline",
        "83597576-cc2c-453c-bea6-2882ae6a1653",
        "/_apis/v1/Timeline/{scopeIdentifier}/{hubName}/{planId}/timeline/{timelineId}",
    ),
    (
        "TimelineRecords",
        "8893bc5b-35b2-4be7-83cb-99e683551db4",
        "/_apis/v1/Timeline/{scopeIdentifier}/{hubName}/{planId}/{timelineId}",
    ),
    (
        "Logfiles",
        "46f5667d-263a-4684-91b1-dff7fdcf64e2",
        "/_apis/v1/Logfiles/{scopeIdentifier}/{hubName}/{planId}/{logId}",
    ),
    (
        "TimeLineWebConsoleLog",
        "858983e4-19bd-4c5e-864c-507b59b58b12",
        "/_apis/v1/TimeLineWebConsoleLog/{scopeIdentifier}/{hubName}/{planId}/{timelineId}/{recordId}",
    ),
    (
        "ActionDownloadInfo",
        "27d7f831-88c1-4719-8ca1-6a061dad90eb",
        "/_apis/v1/ActionDownloadInfo/{scopeIdentifier}/{hubName}/{planId}",
    ),
    (
        "TimelineAttachments",
        "7898f959-9cdf-4096-b29e-7f293031629e",
        "/_apis/v1/Timeline/{scopeIdentifier}/{hubName}/{planId}/{timelineId}/attachments/{recordId}/{type}/{name}",
    ),
    (
        "CustomerIntelligence",
        "b5cc35c2-ff2b-491d-a085-24b6e9f396fd",
        "/_apis/v1/tasks",
    ),
    (
        "Tasks",
        "60aac929-f0cd-4bc8-9ce4-6b30e8f1b1bd",
        "/_apis/v1/tasks/{taskId}/{versionString}",
    ),
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub service_type: &'static str,
    pub identifier: &'static str,
    pub display_name: &'static str,
    pub relative_to_setting: &'static str,
    pub relative_path: &'static str,
    pub description: &'static str,
    pub service_owner: &'static str,
    pub location_mappings: Vec<Value>,
    pub tool_id: &'static str,
    pub status: &'static str,
    pub properties: serde_json::Map<String, Value>,
    pub resource_version: u32,
    pub min_version: &'static str,
    pub max_version: &'static str,
}

impl ServiceDefinition {
    fn new(name: &'static str, identifier: &'static str, relative_path: &'static str) -> Self {
        Self {
            service_type: name,
            identifier,
            display_name: name,
            relative_to_setting: "fullyQualified",
            relative_path,
            description: name,
            service_owner: SERVICE_OWNER,
            location_mappings: Vec::new(),
            tool_id: name,
            status: "active",
            properties: serde_json::Map::new(),
            resource_version: 1,
            min_version: "1.0",
            max_version: "12.0",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationServiceData {
    pub service_definitions: Vec<ServiceDefinition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub instance_id: Uuid,
    pub location_service_data: LocationServiceData,
}

pub fn service_definitions() -> Vec<ServiceDefinition> {
    SERVICES
        .iter()
        .map(|(name, id, path)| ServiceDefinition::new(name, id, path))
        .collect()
}

pub async fn connection_data() -> Json<ConnectionData> {
    Json(ConnectionData {
        instance_id: Uuid::new_v4(),
        location_service_data: LocationServiceData {
            service_definitions: service_definitions(),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub expires_in: u64,
    pub scope: &'static str,
    pub token_type: &'static str,
}

/// Any credential is accepted; the runner just needs a bearer token back.
pub async fn oauth_token() -> Json<OAuthToken> {
    debug!("issuing runner access token");
    Json(OAuthToken {
        access_token: make_jwt("bleephub", "bleephub"),
        expires_in: TOKEN_EXPIRES_IN_SECS,
        scope: "/",
        token_type: "access_token",
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct RunnerRegistrationRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RunnerRegistration {
    pub url: String,
    pub token_schema: &'static str,
    pub token: String,
}

/// Our base URL plus the path of the URL the runner was configured with,
/// so tenant-prefixed calls come back to us.
pub fn tenant_url(server_url: &str, configured: &str) -> String {
    let path = Url::parse(configured)
        .ok()
        .map(|url| url.path().trim_end_matches('/').to_string())
        .unwrap_or_default();
    format!("{server_url}{path}")
}

pub async fn runner_registration(
    ServerUrl(server_url): ServerUrl,
    body: Bytes,
) -> Json<RunnerRegistration> {
    let request: RunnerRegistrationRequest = serde_json::from_slice(&body).unwrap_or_default();
    let url = tenant_url(&server_url, &request.url);
    info!(%url, "runner registration");
    Json(RunnerRegistration {
        url,
        token_schema: "OAuthAccessToken",
        token: format!("bleephub-mgmt-{}", Uuid::new_v4()),
    })
}

#[derive(Debug, Serialize)]
pub struct RegistrationToken {
    pub token: &'static str,
    pub expires_at: &'static str,
}

pub async fn registration_token() -> Json<RegistrationToken> {
    Json(RegistrationToken {
        token: REGISTRATION_TOKEN,
        expires_at: FAR_FUTURE,
    })
}
