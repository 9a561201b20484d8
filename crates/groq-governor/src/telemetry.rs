//! Governor metrics
//!
//! Emitted through the `metrics` facade; without an installed recorder every
//! call is a no-op.
//!
//! - `governor_calls_total` (counter): label `outcome`
//! - `governor_dispatch_duration_seconds` (histogram): label `status`
//! - `governor_circuit_transitions_total` (counter): label `state`
//! - `governor_strategy_selected_total` (counter): label `strategy`

use quota_store::CircuitState;

use crate::strategy::AdaptiveStrategy;

pub const CALLS_TOTAL: &str = "governor_calls_total";
pub const DISPATCH_DURATION_SECONDS: &str = "governor_dispatch_duration_seconds";
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "governor_circuit_transitions_total";
pub const STRATEGY_SELECTED_TOTAL: &str = "governor_strategy_selected_total";

/// Count a finished governed call ("success" or an error kind).
pub fn record_call(outcome: &'static str) {
    metrics::counter!(CALLS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record the latency of one dispatch. `status` is the HTTP status, or a
/// failure label when no response arrived.
pub fn record_dispatch(status: String, duration_secs: f64) {
    metrics::histogram!(DISPATCH_DURATION_SECONDS, "status" => status).record(duration_secs);
}

pub fn record_circuit_transition(to: CircuitState) {
    metrics::counter!(CIRCUIT_TRANSITIONS_TOTAL, "state" => to.label()).increment(1);
}

pub fn record_strategy(strategy: AdaptiveStrategy) {
    metrics::counter!(STRATEGY_SELECTED_TOTAL, "strategy" => strategy.label()).increment(1);
}
