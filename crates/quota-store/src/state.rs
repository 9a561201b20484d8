//! Quota record, circuit status and the per-response quota snapshot

use serde::{Deserialize, Serialize};

/// Default daily request allowance when the provider doesn't say otherwise.
pub const DEFAULT_REQUESTS_PER_DAY: u64 = 14_400;

/// Default per-minute token allowance when the provider doesn't say otherwise.
pub const DEFAULT_TOKENS_PER_MINUTE: u64 = 6_000;

/// Weight of the newest sample in the latency moving average, in fifths.
const LATENCY_EMA_NEW_WEIGHT: u64 = 1;
const LATENCY_EMA_DENOMINATOR: u64 = 5;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Circuit breaker status.
///
/// Transitions (enacted by the governor):
/// - Closed → Open (failure streak or quota floor reached, or 429)
/// - Open → HalfOpen (breaker timeout elapsed)
/// - HalfOpen → HalfOpen (trial unanswered for a full timeout)
/// - HalfOpen → Closed (trial succeeded)
/// - HalfOpen → Open (trial failed)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Status label for health/logging/metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Limits assumed when no record or header says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDefaults {
    pub requests_per_day: u64,
    pub tokens_per_minute: u64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            requests_per_day: DEFAULT_REQUESTS_PER_DAY,
            tokens_per_minute: DEFAULT_TOKENS_PER_MINUTE,
        }
    }
}

/// Quota snapshot parsed from one provider response's rate limit headers.
///
/// Always complete: the header parser substitutes defaults for anything
/// missing. Reset markers and retry-after are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub requests_limit: u64,
    pub requests_remaining: u64,
    pub requests_reset: Option<String>,
    pub tokens_limit: u64,
    pub tokens_remaining: u64,
    pub tokens_reset: Option<String>,
    pub retry_after: Option<String>,
}

impl QuotaInfo {
    /// Full quota at the given limits, as assumed for an absent header set.
    pub fn full(defaults: QuotaDefaults) -> Self {
        Self {
            requests_limit: defaults.requests_per_day,
            requests_remaining: defaults.requests_per_day,
            requests_reset: None,
            tokens_limit: defaults.tokens_per_minute,
            tokens_remaining: defaults.tokens_per_minute,
            tokens_reset: None,
            retry_after: None,
        }
    }

    /// Snapshot carrying the record's last-known numbers. Used to record a
    /// failure that produced no response headers without disturbing quota.
    pub fn from_state(state: &QuotaState) -> Self {
        Self {
            requests_limit: state.requests_limit_rpd,
            requests_remaining: state.requests_remaining_rpd,
            requests_reset: None,
            tokens_limit: state.tokens_limit_tpm,
            tokens_remaining: state.tokens_remaining_tpm,
            tokens_reset: None,
            retry_after: None,
        }
    }
}

/// The persisted quota and circuit record.
///
/// Invariants maintained by the `apply_*` methods:
/// - `*_remaining <= *_limit` and `*_limit >= 1`
/// - `circuit_opened_at` is `Some` exactly while the circuit is open or
///   half-open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    #[serde(rename = "requestsRemainingRPD")]
    pub requests_remaining_rpd: u64,
    #[serde(rename = "requestsLimitRPD")]
    pub requests_limit_rpd: u64,
    #[serde(rename = "tokensRemainingTPM")]
    pub tokens_remaining_tpm: u64,
    #[serde(rename = "tokensLimitTPM")]
    pub tokens_limit_tpm: u64,
    pub avg_latency_ms: u64,
    pub circuit_state: CircuitState,
    /// Unix milliseconds when the circuit last opened
    pub circuit_opened_at: Option<u64>,
    pub consecutive_failures: u32,
}

impl QuotaState {
    /// Fresh record: full quota, circuit closed, no failures.
    pub fn with_defaults(defaults: QuotaDefaults) -> Self {
        let limit_rpd = defaults.requests_per_day.max(1);
        let limit_tpm = defaults.tokens_per_minute.max(1);
        Self {
            requests_remaining_rpd: limit_rpd,
            requests_limit_rpd: limit_rpd,
            tokens_remaining_tpm: limit_tpm,
            tokens_limit_tpm: limit_tpm,
            avg_latency_ms: 0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            consecutive_failures: 0,
        }
    }

    /// Fraction of the daily request allowance left, in `[0, 1]`.
    pub fn request_ratio(&self) -> f64 {
        self.requests_remaining_rpd as f64 / self.requests_limit_rpd.max(1) as f64
    }

    /// Fraction of the per-minute token allowance left, in `[0, 1]`.
    pub fn token_ratio(&self) -> f64 {
        self.tokens_remaining_tpm as f64 / self.tokens_limit_tpm.max(1) as f64
    }

    /// Fold one dispatch outcome into the record.
    pub fn apply_quota_info(&mut self, info: &QuotaInfo, latency_ms: u64, success: bool) {
        self.requests_limit_rpd = info.requests_limit.max(1);
        self.requests_remaining_rpd = info.requests_remaining.min(self.requests_limit_rpd);
        self.tokens_limit_tpm = info.tokens_limit.max(1);
        self.tokens_remaining_tpm = info.tokens_remaining.min(self.tokens_limit_tpm);

        self.avg_latency_ms = if self.avg_latency_ms == 0 {
            latency_ms
        } else {
            (self.avg_latency_ms * (LATENCY_EMA_DENOMINATOR - LATENCY_EMA_NEW_WEIGHT)
                + latency_ms * LATENCY_EMA_NEW_WEIGHT)
                / LATENCY_EMA_DENOMINATOR
        };

        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }

    /// Move the circuit, keeping `circuit_opened_at` consistent.
    ///
    /// Opening always restarts the timeout window. Half-open stamps the start
    /// of the trial. Closing clears it and the failure streak.
    pub fn apply_circuit_state(&mut self, state: CircuitState, now_millis: u64) {
        match state {
            CircuitState::Closed => {
                self.circuit_opened_at = None;
                self.consecutive_failures = 0;
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                self.circuit_opened_at = Some(now_millis);
            }
        }
        self.circuit_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(requests: (u64, u64), tokens: (u64, u64)) -> QuotaInfo {
        QuotaInfo {
            requests_remaining: requests.0,
            requests_limit: requests.1,
            tokens_remaining: tokens.0,
            tokens_limit: tokens.1,
            ..QuotaInfo::full(QuotaDefaults::default())
        }
    }

    #[test]
    fn defaults_are_full_and_closed() {
        let state = QuotaState::with_defaults(QuotaDefaults::default());
        assert_eq!(state.requests_remaining_rpd, 14_400);
        assert_eq!(state.requests_limit_rpd, 14_400);
        assert_eq!(state.tokens_remaining_tpm, 6_000);
        assert_eq!(state.tokens_limit_tpm, 6_000);
        assert_eq!(state.circuit_state, CircuitState::Closed);
        assert_eq!(state.circuit_opened_at, None);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn zero_default_limits_are_raised_to_one() {
        let state = QuotaState::with_defaults(QuotaDefaults {
            requests_per_day: 0,
            tokens_per_minute: 0,
        });
        assert_eq!(state.requests_limit_rpd, 1);
        assert_eq!(state.tokens_limit_tpm, 1);
    }

    #[test]
    fn apply_quota_info_copies_numbers() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        state.apply_quota_info(&info((500, 14_400), (4_000, 6_000)), 120, true);
        assert_eq!(state.requests_remaining_rpd, 500);
        assert_eq!(state.tokens_remaining_tpm, 4_000);
        assert_eq!(state.avg_latency_ms, 120);
    }

    #[test]
    fn apply_quota_info_clamps_remaining_to_limit() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        state.apply_quota_info(&info((20_000, 14_400), (7, 0)), 10, true);
        assert_eq!(state.requests_remaining_rpd, 14_400);
        assert_eq!(state.tokens_limit_tpm, 1);
        assert_eq!(state.tokens_remaining_tpm, 1);
    }

    #[test]
    fn failures_accumulate_and_success_resets() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        let snapshot = QuotaInfo::full(QuotaDefaults::default());
        state.apply_quota_info(&snapshot, 10, false);
        state.apply_quota_info(&snapshot, 10, false);
        assert_eq!(state.consecutive_failures, 2);
        state.apply_quota_info(&snapshot, 10, true);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn latency_average_moves_toward_new_samples() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        let snapshot = QuotaInfo::full(QuotaDefaults::default());
        state.apply_quota_info(&snapshot, 100, true);
        assert_eq!(state.avg_latency_ms, 100);
        state.apply_quota_info(&snapshot, 600, true);
        // (100 * 4 + 600) / 5
        assert_eq!(state.avg_latency_ms, 200);
    }

    #[test]
    fn opening_sets_timestamp_and_closing_clears_it() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        state.consecutive_failures = 3;

        state.apply_circuit_state(CircuitState::Open, 1_000);
        assert_eq!(state.circuit_state, CircuitState::Open);
        assert_eq!(state.circuit_opened_at, Some(1_000));
        assert_eq!(state.consecutive_failures, 3);

        state.apply_circuit_state(CircuitState::Closed, 2_000);
        assert_eq!(state.circuit_state, CircuitState::Closed);
        assert_eq!(state.circuit_opened_at, None);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn half_open_stamps_trial_start() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        state.apply_circuit_state(CircuitState::Open, 1_000);
        state.apply_circuit_state(CircuitState::HalfOpen, 70_000);
        assert_eq!(state.circuit_state, CircuitState::HalfOpen);
        assert_eq!(state.circuit_opened_at, Some(70_000));
    }

    #[test]
    fn reopening_from_half_open_restarts_window() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        state.apply_circuit_state(CircuitState::Open, 1_000);
        state.apply_circuit_state(CircuitState::HalfOpen, 70_000);
        state.apply_circuit_state(CircuitState::Open, 71_000);
        assert_eq!(state.circuit_opened_at, Some(71_000));
    }

    #[test]
    fn serializes_with_record_field_names() {
        let state = QuotaState::with_defaults(QuotaDefaults::default());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["requestsRemainingRPD"], 14_400);
        assert_eq!(json["tokensLimitTPM"], 6_000);
        assert_eq!(json["circuitState"], "closed");
        assert!(json["circuitOpenedAt"].is_null());
        assert_eq!(json["consecutiveFailures"], 0);

        let mut half_open = state.clone();
        half_open.apply_circuit_state(CircuitState::HalfOpen, 5);
        let json = serde_json::to_value(&half_open).unwrap();
        assert_eq!(json["circuitState"], "half-open");
    }

    #[test]
    fn ratios_use_remaining_over_limit() {
        let mut state = QuotaState::with_defaults(QuotaDefaults::default());
        state.requests_remaining_rpd = 7_200;
        state.tokens_remaining_tpm = 1_500;
        assert!((state.request_ratio() - 0.5).abs() < f64::EPSILON);
        assert!((state.token_ratio() - 0.25).abs() < f64::EPSILON);
    }
}
