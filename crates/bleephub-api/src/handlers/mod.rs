//! Request handlers organized by resource.

pub mod actions;
pub mod agents;
pub mod broker;
pub mod connection;
pub mod health;
pub mod run_service;
pub mod secrets;
pub mod timeline;
pub mod workflows;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::sync::Arc;

use crate::state::AppState;

/// Our own base URL as the caller addressed us (`scheme://host[:port]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl(pub String);

impl FromRequestParts<Arc<AppState>> for ServerUrl {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
            .unwrap_or("localhost");
        Ok(Self(format!("{}://{host}", state.scheme)))
    }
}
