//! Admin API for quota and circuit inspection
//!
//! Endpoints:
//! - GET /admin/quota: quota record, strategy tier and policy
//! - PUT /admin/circuit: force the circuit open, half-open or closed
//!
//! Served on `server.admin_listen_addr` when configured, otherwise merged into
//! the main router.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use groq_governor::{CircuitState, Governor};
use serde::Deserialize;
use tracing::warn;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    governor: Arc<Governor>,
}

impl AdminState {
    pub fn new(governor: Arc<Governor>) -> Self {
        Self { governor }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/quota", get(quota_status))
        .route("/admin/circuit", put(set_circuit))
        .with_state(state)
}

fn json(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/quota: the governor's current view of quota and circuit.
async fn quota_status(State(state): State<AdminState>) -> impl IntoResponse {
    match state.governor.status().await {
        Ok(status) => json(
            StatusCode::OK,
            serde_json::json!({
                "provider": state.governor.provider_id(),
                "status": status,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "failed to read quota state");
            json(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            )
        }
    }
}

#[derive(Deserialize)]
struct SetCircuitRequest {
    state: CircuitState,
}

/// PUT /admin/circuit: operator override, e.g. `{"state":"closed"}` after a
/// provider incident is resolved.
async fn set_circuit(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<SetCircuitRequest>,
) -> impl IntoResponse {
    match state.governor.set_circuit(body.state).await {
        Ok(quota) => json(
            StatusCode::OK,
            serde_json::json!({
                "circuit_state": body.state.label(),
                "quota": quota,
            }),
        ),
        Err(e) => {
            warn!(error = %e, state = body.state.label(), "failed to set circuit state");
            json(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            )
        }
    }
}
