//! Prometheus metrics exposition
//!
//! Gateway-level metrics, rendered alongside the governor's own
//! (`governor_*`, see `groq_governor::telemetry`):
//!
//! - `gateway_requests_total` (counter): labels `status`, `route`
//! - `gateway_request_duration_seconds` (histogram): label `status`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const REQUESTS_TOTAL: &str = "gateway_requests_total";
const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";

/// 5ms to 60s, spanning the strategy delays and the dispatch timeout range.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Builder with histogram buckets for both latency metrics, so they render
/// as Prometheus histograms (`_bucket` lines) rather than summaries.
fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(groq_governor::telemetry::DISPATCH_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished inbound request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    metrics::counter!(REQUESTS_TOTAL, "status" => status.clone(), "route" => route).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "status" => status).record(duration_secs);
}
