//! Chat completion endpoint
//!
//! Decodes an OpenAI-style completion request, runs it through the governor
//! and returns the provider payload. Governor rejections map to HTTP errors
//! via `crate::error`.

use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use groq_governor::{CompletionRequest, Governor};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::{error_response, governor_error_response};
use crate::metrics;

const ROUTE: &str = "chat_completions";

static STRATEGY_HEADER: HeaderName = HeaderName::from_static("x-governor-strategy");
static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn chat_completions(governor: &Governor, body: Bytes, request_id: String) -> Response {
    let started = Instant::now();

    let response = match decode(&body) {
        Ok(request) => governed_call(governor, &request, &request_id).await,
        Err(message) => {
            warn!(error = %message, "rejecting malformed completion request");
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &message,
                &request_id,
                None,
            )
        }
    };

    metrics::record_request(
        ROUTE,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

fn decode(body: &[u8]) -> Result<CompletionRequest, String> {
    let request: CompletionRequest =
        serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))?;
    if request.model.trim().is_empty() {
        return Err("model must not be empty".into());
    }
    if request.messages.is_empty() {
        return Err("messages must not be empty".into());
    }
    Ok(request)
}

async fn governed_call(
    governor: &Governor,
    request: &CompletionRequest,
    request_id: &str,
) -> Response {
    match governor.call(request).await {
        Ok(governed) => {
            info!(
                model = %request.model,
                latency_ms = governed.latency_ms,
                strategy = governed.strategy.label(),
                requests_remaining = governed.quota_info.requests_remaining,
                tokens_remaining = governed.quota_info.tokens_remaining,
                "completion served"
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/json".to_string()),
                    (
                        STRATEGY_HEADER.clone(),
                        governed.strategy.label().to_string(),
                    ),
                    (REQUEST_ID_HEADER.clone(), request_id.to_string()),
                ],
                governed.data.to_string(),
            )
                .into_response()
        }
        Err(err) => {
            warn!(
                model = %request.model,
                error = %err,
                kind = err.kind(),
                "governed call failed"
            );
            governor_error_response(&err, request_id)
        }
    }
}
