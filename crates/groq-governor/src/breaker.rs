//! Circuit breaker decisions
//!
//! Pure functions over the persisted record. The breaker never writes: the
//! governor enacts the transitions it recommends.
//!
//! Opening conditions, any one sufficient:
//! - the failure streak reached `max_consecutive_failures`
//! - tokens remaining fell below `min_tokens_remaining`
//! - requests remaining fell below `min_requests_remaining`
//!
//! Near-exhausted quota opens the circuit on its own, before any failure is
//! observed.

use std::time::Duration;

use quota_store::{CircuitState, QuotaState};

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_MIN_TOKENS_REMAINING: u64 = 100;
pub const DEFAULT_MIN_REQUESTS_REMAINING: u64 = 10;
pub const DEFAULT_CIRCUIT_BREAKER_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreaker {
    pub max_consecutive_failures: u32,
    pub min_tokens_remaining: u64,
    pub min_requests_remaining: u64,
    /// How long the circuit stays open before a half-open trial is allowed
    pub timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            min_tokens_remaining: DEFAULT_MIN_TOKENS_REMAINING,
            min_requests_remaining: DEFAULT_MIN_REQUESTS_REMAINING,
            timeout: DEFAULT_CIRCUIT_BREAKER_TIMEOUT,
        }
    }
}

impl CircuitBreaker {
    /// Whether the record warrants opening the circuit.
    pub fn should_open(&self, state: &QuotaState) -> bool {
        state.consecutive_failures >= self.max_consecutive_failures
            || state.tokens_remaining_tpm < self.min_tokens_remaining
            || state.requests_remaining_rpd < self.min_requests_remaining
    }

    /// Whether an open circuit may admit a half-open trial at `now_millis`.
    ///
    /// An open record without an opening time is treated as expired rather
    /// than left open forever.
    pub fn can_try_half_open(&self, state: &QuotaState, now_millis: u64) -> bool {
        state.circuit_state == CircuitState::Open && self.window_elapsed(state, now_millis)
    }

    /// Whether a half-open trial has gone unanswered for a full breaker
    /// timeout, so another caller may take over the trial.
    ///
    /// A half-open circuit otherwise admits nothing beyond the call that
    /// moved it there.
    pub fn trial_expired(&self, state: &QuotaState, now_millis: u64) -> bool {
        state.circuit_state == CircuitState::HalfOpen && self.window_elapsed(state, now_millis)
    }

    /// Whole seconds until a half-open trial is allowed, rounded up. Zero
    /// once the timeout has elapsed.
    pub fn seconds_until_half_open(&self, state: &QuotaState, now_millis: u64) -> u64 {
        let Some(opened_at) = state.circuit_opened_at else {
            return 0;
        };
        let elapsed = now_millis.saturating_sub(opened_at);
        let remaining_ms = self.timeout_millis().saturating_sub(elapsed);
        remaining_ms.div_ceil(1000)
    }

    /// Breaker timeout in whole seconds, rounded up.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_millis().div_ceil(1000)
    }

    fn window_elapsed(&self, state: &QuotaState, now_millis: u64) -> bool {
        match state.circuit_opened_at {
            Some(opened_at) => now_millis.saturating_sub(opened_at) >= self.timeout_millis(),
            None => true,
        }
    }

    fn timeout_millis(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}
