//! Groq Governor Gateway
//!
//! HTTP front for the adaptive governor:
//! 1. Accepts OpenAI-style chat completion requests
//! 2. Paces them by remaining Groq quota and trips the circuit breaker under
//!    sustained failure
//! 3. Exposes health, Prometheus metrics and an operator admin API

mod admin;
mod api;
mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use groq_governor::{CircuitState, Governor};
use provider::GroqProvider;
use quota_store::{FileQuotaStore, MemoryQuotaStore, QuotaStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;

/// Time allowed for in-flight requests after a shutdown signal. Covers the
/// longest strategy delay plus a default dispatch timeout.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(35);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    governor: Arc<Governor>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrent requests; excess requests wait for a
/// permit.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(completions_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, LOG_LEVEL then RUST_LOG, default info
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting groq-governor-gateway");

    // Before any metric is emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        endpoint = %config.groq.endpoint,
        timeout_secs = config.groq.timeout_secs,
        max_connections = config.server.max_connections,
        "configuration loaded"
    );
    if config.groq.api_key.is_none() {
        warn!("no Groq API key configured, completion calls will fail until one is set");
    }

    let settings = config.governor.settings();
    let store: Arc<dyn QuotaStore> = match &config.store.path {
        Some(path) => {
            let store = FileQuotaStore::load(path.clone(), settings.defaults)
                .await
                .with_context(|| format!("failed to open quota store {}", path.display()))?;
            info!(path = %path.display(), "using file quota store");
            Arc::new(store)
        }
        None => {
            info!("using in-memory quota store");
            Arc::new(MemoryQuotaStore::new(settings.defaults))
        }
    };

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let provider = Arc::new(GroqProvider::new(
        client,
        config.groq.endpoint.clone(),
        config.groq.api_key.clone(),
        config.timeout(),
    ));

    let governor = Arc::new(Governor::new(provider, store, settings));

    let app_state = AppState {
        governor: governor.clone(),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let admin_router = build_admin_router(AdminState::new(governor));
    let mut app = build_router(app_state, config.server.max_connections);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let admin_handle = match config.server.admin_listen_addr {
        Some(admin_addr) => {
            let listener = TcpListener::bind(admin_addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;
            info!(addr = %admin_addr, "admin API listening");
            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, admin_router)
                    .with_graceful_shutdown(async move {
                        let _ = rx.changed().await;
                    })
                    .await
            }))
        }
        None => {
            app = app.merge(admin_router);
            None
        }
    };

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let mut rx = shutdown_rx;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }
    if let Some(handle) = admin_handle {
        handle.abort();
    }

    info!("shutdown complete");
    Ok(())
}

/// Returns 200 while calls are admitted, 503 while the circuit is open or the
/// quota record can't be read.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();

    let (status_code, body) = match state.governor.status().await {
        Ok(status) => {
            let open = status.state.circuit_state == CircuitState::Open;
            (
                if open {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                },
                serde_json::json!({
                    "status": if open { "degraded" } else { "healthy" },
                    "circuit": status.state.circuit_state.label(),
                    "strategy": status.strategy.label(),
                    "seconds_until_half_open": status.seconds_until_half_open,
                    "requests_remaining": status.state.requests_remaining_rpd,
                    "requests_limit": status.state.requests_limit_rpd,
                    "tokens_remaining": status.state.tokens_remaining_tpm,
                    "tokens_limit": status.state.tokens_limit_tpm,
                    "avg_latency_ms": status.state.avg_latency_ms,
                    "consecutive_failures": status.state.consecutive_failures,
                    "uptime_seconds": uptime,
                }),
            )
        }
        Err(e) => {
            warn!(error = %e, "health check could not read quota state");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unavailable",
                    "error": e.to_string(),
                    "uptime_seconds": uptime,
                }),
            )
        }
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn completions_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    api::chat_completions(&state.governor, body, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use common::Secret;
    use groq_governor::{GovernorSettings, QuotaDefaults};
    use tower::ServiceExt;

    /// Handle without a global recorder, so tests can run in one process.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_app_state(
        endpoint: &str,
        api_key: Option<&str>,
    ) -> (AppState, Arc<MemoryQuotaStore>) {
        let store = Arc::new(MemoryQuotaStore::new(QuotaDefaults::default()));
        let provider = Arc::new(GroqProvider::new(
            reqwest::Client::new(),
            endpoint,
            api_key.and_then(Secret::from_trimmed),
            Duration::from_secs(5),
        ));
        let governor = Governor::new(provider, store.clone(), GovernorSettings::default());
        let state = AppState {
            governor: Arc::new(governor),
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        };
        (state, store)
    }

    /// Mock Groq endpoint. Answers with the given status, echoes the bearer
    /// token it received and reports plentiful quota.
    async fn start_mock_groq(status: StatusCode) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}/openai/v1/chat/completions");

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/openai/v1/chat/completions",
                post(move |headers: HeaderMap, body: Bytes| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let request: serde_json::Value =
                        serde_json::from_slice(&body).unwrap_or_default();
                    let payload = if status.is_success() {
                        serde_json::json!({
                            "id": "chatcmpl-test",
                            "model": request["model"],
                            "choices": [{"message": {"role": "assistant", "content": "pong"}}],
                            "echoed_authorization": auth,
                        })
                    } else {
                        serde_json::json!({"error": {"message": "slow down"}})
                    };
                    (
                        status,
                        [
                            ("x-ratelimit-limit-requests", "14400"),
                            ("x-ratelimit-remaining-requests", "14000"),
                            ("x-ratelimit-limit-tokens", "6000"),
                            ("x-ratelimit-remaining-tokens", "5900"),
                            ("retry-after", "17"),
                        ],
                        axum::Json(payload),
                    )
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    fn completion_request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"model":"llama-3.1-8b-instant","messages":[{"role":"user","content":"ping"}]}"#,
            ))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn completion_is_forwarded_with_bearer_auth() {
        let (endpoint, _server) = start_mock_groq(StatusCode::OK).await;
        let (state, store) = test_app_state(&endpoint, Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app.oneshot(completion_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-governor-strategy"], "aggressive");
        assert!(
            response.headers()["x-request-id"]
                .to_str()
                .unwrap()
                .starts_with("req_")
        );
        let json = body_json(response).await;
        assert_eq!(json["choices"][0]["message"]["content"], "pong");
        assert_eq!(json["model"], "llama-3.1-8b-instant");
        assert_eq!(json["echoed_authorization"], "Bearer gsk_test");

        let quota = store.get_quota_state().await.unwrap();
        assert_eq!(quota.requests_remaining_rpd, 14_000);
        assert_eq!(quota.tokens_remaining_tpm, 5_900);
    }

    #[tokio::test]
    async fn upstream_rate_limit_maps_to_429_and_opens_circuit() {
        let (endpoint, _server) = start_mock_groq(StatusCode::TOO_MANY_REQUESTS).await;
        let (state, _) = test_app_state(&endpoint, Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app.clone().oneshot(completion_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "17");
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "rate_limited");

        // Next call is refused locally
        let response = app.clone().oneshot(completion_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("retry-after"));
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "circuit_open");

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["circuit"], "open");
    }

    #[tokio::test]
    async fn upstream_server_error_maps_to_502() {
        let (endpoint, _server) = start_mock_groq(StatusCode::INTERNAL_SERVER_ERROR).await;
        let (state, store) = test_app_state(&endpoint, Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app.oneshot(completion_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "provider_error");
        assert_eq!(
            store.get_quota_state().await.unwrap().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let (state, store) = test_app_state("http://127.0.0.1:9/unused", None);
        let app = build_router(state, 100);

        let response = app.oneshot(completion_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "configuration");
        assert_eq!(
            store.get_quota_state().await.unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_maps_to_502() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (state, _) = test_app_state(&format!("http://{addr}/v1"), Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app.oneshot(completion_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "transport");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_dispatch() {
        let (state, store) = test_app_state("http://127.0.0.1:9/unused", Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .body(Body::from("{\"model\":"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_request");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(
            store.get_quota_state().await.unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn health_reports_quota_snapshot() {
        let (state, _) = test_app_state("http://127.0.0.1:9/unused", Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["circuit"], "closed");
        assert_eq!(json["strategy"], "aggressive");
        assert_eq!(json["requests_remaining"], 14_400);
        assert_eq!(json["tokens_limit"], 6_000);
        assert!(json["seconds_until_half_open"].is_null());
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_format() {
        let (state, _) = test_app_state("http://127.0.0.1:9/unused", Some("gsk_test"));
        let app = build_router(state, 100);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn admin_routes_merge_into_main_router() {
        let (state, _) = test_app_state("http://127.0.0.1:9/unused", Some("gsk_test"));
        let admin = build_admin_router(AdminState::new(state.governor.clone()));
        let app = build_router(state, 100).merge(admin);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/quota")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
