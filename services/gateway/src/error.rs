//! HTTP rendering of governor errors
//!
//! Every error body has the shape
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.
//! Rejections that carry a wait time also set `Retry-After` (seconds).

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use groq_governor::Error;

/// HTTP status for a governor error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::Provider { .. } | Error::Transport(_) | Error::InvalidResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Configuration(_) | Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON error response, with `Retry-After` when `retry_after_secs` is set.
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
    retry_after_secs: Option<u64>,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    let mut response = (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response();
    if let Some(secs) = retry_after_secs {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

pub fn governor_error_response(err: &Error, request_id: &str) -> Response {
    error_response(
        status_for(err),
        err.kind(),
        &err.to_string(),
        request_id,
        err.retry_after_secs(),
    )
}
