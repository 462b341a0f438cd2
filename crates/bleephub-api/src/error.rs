//! Mapping from core errors to HTTP status codes.

use axum::http::StatusCode;
use bleephub_core::Error;
use tracing::error;

/// Handler error: status plus a plain-text body.
pub type ApiError = (StatusCode, String);

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        e if e.is_invalid_input() => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        Error::WorkflowAlreadyCompleted => StatusCode::CONFLICT,
        Error::TooManyWorkflows { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::ActionFetch(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(err: Error) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(status = status.as_u16(), error = %err, "request failed");
    }
    (status, err.to_string())
}

pub fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{what} not found"))
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}
