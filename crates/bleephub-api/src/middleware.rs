//! HTTP middleware for the API server.

use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Path segments a runner's tenant prefix can hide.
const API_ROOTS: [&str; 2] = ["/_apis/", "/api/"];

/// Create CORS middleware layer.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_origin(Any)
}

/// Tag request and response with a request id, keeping one the caller sent.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    if let Some(id) = &id {
        request.headers_mut().insert(REQUEST_ID_HEADER, id.clone());
    }
    let mut response = next.run(request).await;
    if let Some(id) = id {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    response
}

/// One debug line per request.
pub async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// The path starting at the first API root found after position zero.
///
/// Runners prepend the tenant URL path to every call, so
/// `/owner/repo/_apis/v1/Message/1` has to route like `/_apis/v1/Message/1`.
pub fn strip_tenant_prefix(path: &str) -> Option<&str> {
    API_ROOTS
        .iter()
        .find_map(|root| path.find(root).filter(|idx| *idx > 0))
        .map(|idx| &path[idx..])
}

fn with_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

/// Fallback for the outer router: re-route tenant-prefixed paths through
/// `inner`, answer everything else with the catch-all.
pub async fn tenant_fallback(inner: Router, mut request: Request) -> Response {
    let rewritten = strip_tenant_prefix(request.uri().path())
        .and_then(|path| with_path(request.uri(), path));

    match rewritten {
        Some(uri) => {
            debug!(from = %request.uri().path(), to = %uri.path(), "stripped tenant prefix");
            *request.uri_mut() = uri;
            match inner.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            }
        }
        None => catch_all(request).await.into_response(),
    }
}

/// Runners probe optional endpoints; unmatched requests are logged and
/// answered with an empty 200.
pub async fn catch_all(request: Request) -> StatusCode {
    warn!(
        method = %request.method(),
        path = %request.uri().path(),
        query = request.uri().query().unwrap_or(""),
        "unhandled request"
    );
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_tenant_prefixes() {
        assert_eq!(
            strip_tenant_prefix("/acme/app/_apis/v1/Message/1"),
            Some("/_apis/v1/Message/1")
        );
        assert_eq!(
            strip_tenant_prefix("/acme/api/v3/actions/runner-registration"),
            Some("/api/v3/actions/runner-registration")
        );
        assert_eq!(strip_tenant_prefix("/_apis/connectionData"), None);
        assert_eq!(strip_tenant_prefix("/api/v3/bleephub/workflow"), None);
        assert_eq!(strip_tenant_prefix("/health"), None);
    }

    #[test]
    fn rewriting_keeps_the_query() {
        let uri: Uri = "/acme/app/_apis/v1/Message/1?sessionId=abc".parse().unwrap();
        let path = strip_tenant_prefix(uri.path()).unwrap();
        let rewritten = with_path(&uri, path).unwrap();
        assert_eq!(rewritten.path(), "/_apis/v1/Message/1");
        assert_eq!(rewritten.query(), Some("sessionId=abc"));
    }
}
