//! The governor: one governed call per `call`

use std::sync::Arc;
use std::time::Duration;

use provider::{CompletionRequest, Provider};
use quota_store::{CircuitState, QuotaDefaults, QuotaInfo, QuotaState, QuotaStore, now_millis};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::headers::{parse_rate_limit_headers, retry_after_secs};
use crate::strategy::{AdaptiveConfig, AdaptiveStrategy, compute_strategy, config_for};
use crate::telemetry;

/// Retry hint used when a 429 carries no usable `retry-after`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Characters of an error body kept in `Error::Provider`.
const BODY_EXCERPT_CHARS: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct GovernorSettings {
    /// Limits assumed when headers or the record are missing
    pub defaults: QuotaDefaults,
    pub breaker: CircuitBreaker,
    pub default_retry_after: Duration,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            defaults: QuotaDefaults::default(),
            breaker: CircuitBreaker::default(),
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

/// A successful governed call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorResponse {
    /// Decoded provider payload
    pub data: serde_json::Value,
    pub quota_info: QuotaInfo,
    pub latency_ms: u64,
    /// Tier in force when the call was paced
    pub strategy: AdaptiveStrategy,
}

/// Read-only view of the governor for health and admin endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorStatus {
    pub state: QuotaState,
    pub strategy: AdaptiveStrategy,
    pub config: AdaptiveConfig,
    /// Present only while the circuit is open
    pub seconds_until_half_open: Option<u64>,
}

/// Paces, dispatches and accounts for calls to one provider.
///
/// Holds no mutable state of its own; everything that must survive between
/// calls lives in the store. Cheap to share behind an `Arc`.
pub struct Governor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn QuotaStore>,
    settings: GovernorSettings,
}

impl Governor {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn QuotaStore>,
        settings: GovernorSettings,
    ) -> Self {
        Self {
            provider,
            store,
            settings,
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Run one governed call.
    ///
    /// Exactly one dispatch at most, never retried. Every outcome other than
    /// a configuration error, a closed-door rejection or a store failure is
    /// recorded in the store before returning.
    pub async fn call(&self, request: &CompletionRequest) -> Result<GovernorResponse> {
        let result = self.call_inner(request).await;
        telemetry::record_call(match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        });
        result
    }

    async fn call_inner(&self, request: &CompletionRequest) -> Result<GovernorResponse> {
        self.provider.validate()?;

        let mut state = self.store.get_quota_state().await?;
        let breaker = self.settings.breaker;
        let now = now_millis();

        match state.circuit_state {
            CircuitState::Open => {
                if breaker.can_try_half_open(&state, now) {
                    state = self.transition(CircuitState::HalfOpen).await?;
                } else {
                    let seconds_remaining = breaker.seconds_until_half_open(&state, now);
                    debug!(
                        provider = self.provider.id(),
                        seconds_remaining, "circuit open, call rejected"
                    );
                    return Err(Error::CircuitOpen { seconds_remaining });
                }
            }
            CircuitState::HalfOpen => {
                if breaker.trial_expired(&state, now) {
                    warn!(
                        provider = self.provider.id(),
                        "half-open trial never reported back, admitting a new trial"
                    );
                    state = self.transition(CircuitState::HalfOpen).await?;
                } else {
                    let seconds_remaining = breaker.seconds_until_half_open(&state, now);
                    debug!(
                        provider = self.provider.id(),
                        seconds_remaining, "trial call in flight, call rejected"
                    );
                    return Err(Error::CircuitOpen { seconds_remaining });
                }
            }
            CircuitState::Closed if breaker.should_open(&state) => {
                warn!(
                    provider = self.provider.id(),
                    requests_remaining = state.requests_remaining_rpd,
                    tokens_remaining = state.tokens_remaining_tpm,
                    consecutive_failures = state.consecutive_failures,
                    "breaker threshold reached before dispatch"
                );
                self.transition(CircuitState::Open).await?;
                return Err(Error::CircuitOpen {
                    seconds_remaining: breaker.timeout_secs(),
                });
            }
            CircuitState::Closed => {}
        }

        let strategy = compute_strategy(&state);
        let config = config_for(strategy);
        telemetry::record_strategy(strategy);
        if config.delay_ms > 0 {
            debug!(
                strategy = strategy.label(),
                delay_ms = config.delay_ms,
                "pacing call"
            );
            tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
        }

        let trial = state.circuit_state == CircuitState::HalfOpen;
        let started = Instant::now();
        let outcome = self.provider.dispatch(request).await;
        let elapsed = started.elapsed();
        let latency_ms = elapsed.as_millis() as u64;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                let err = Error::from(err);
                if matches!(err, Error::Configuration(_)) {
                    return Err(err);
                }
                telemetry::record_dispatch(err.kind().to_string(), elapsed.as_secs_f64());
                warn!(
                    provider = self.provider.id(),
                    error = %err,
                    latency_ms,
                    "dispatch failed without a response"
                );
                // No headers to learn from: keep the last known quota.
                let info = QuotaInfo::from_state(&state);
                let updated = self.store.update_quota_state(&info, latency_ms, false).await?;
                self.open_after_failure(trial, &updated).await?;
                return Err(err);
            }
        };

        telemetry::record_dispatch(response.status.to_string(), elapsed.as_secs_f64());
        let quota_info = parse_rate_limit_headers(&response.headers, self.settings.defaults);

        if !response.is_success() {
            let updated = self
                .store
                .update_quota_state(&quota_info, latency_ms, false)
                .await?;

            if response.status == 429 {
                let retry_after_secs = retry_after_secs(&quota_info)
                    .unwrap_or(self.settings.default_retry_after.as_secs());
                warn!(
                    provider = self.provider.id(),
                    retry_after_secs, "provider rate limited the call"
                );
                self.transition(CircuitState::Open).await?;
                return Err(Error::RateLimited { retry_after_secs });
            }

            warn!(
                provider = self.provider.id(),
                status = response.status,
                latency_ms,
                consecutive_failures = updated.consecutive_failures,
                "provider returned error status"
            );
            self.open_after_failure(trial, &updated).await?;
            return Err(Error::Provider {
                status: response.status,
                body: response.body_excerpt(BODY_EXCERPT_CHARS),
            });
        }

        let updated = self
            .store
            .update_quota_state(&quota_info, latency_ms, true)
            .await?;
        if updated.circuit_state != CircuitState::Closed {
            self.transition(CircuitState::Closed).await?;
        }

        let data = serde_json::from_slice(&response.body)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        debug!(
            provider = self.provider.id(),
            status = response.status,
            latency_ms,
            strategy = strategy.label(),
            requests_remaining = quota_info.requests_remaining,
            tokens_remaining = quota_info.tokens_remaining,
            "call succeeded"
        );

        Ok(GovernorResponse {
            data,
            quota_info,
            latency_ms,
            strategy,
        })
    }

    /// Current record and the policy it implies. Creates the record on
    /// first use; otherwise no side effects.
    pub async fn status(&self) -> Result<GovernorStatus> {
        let state = self.store.get_quota_state().await?;
        let strategy = compute_strategy(&state);
        let seconds_until_half_open = (state.circuit_state == CircuitState::Open).then(|| {
            self.settings
                .breaker
                .seconds_until_half_open(&state, now_millis())
        });
        Ok(GovernorStatus {
            config: config_for(strategy),
            strategy,
            seconds_until_half_open,
            state,
        })
    }

    /// Operator override of the circuit.
    pub async fn set_circuit(&self, to: CircuitState) -> Result<QuotaState> {
        warn!(
            provider = self.provider.id(),
            state = to.label(),
            "circuit set by operator"
        );
        self.transition(to).await
    }

    /// A failed half-open trial always reopens; otherwise reopen only when
    /// the updated record crosses a breaker threshold.
    async fn open_after_failure(&self, trial: bool, updated: &QuotaState) -> Result<()> {
        let warranted = trial || self.settings.breaker.should_open(updated);
        if warranted && updated.circuit_state != CircuitState::Open {
            self.transition(CircuitState::Open).await?;
        }
        Ok(())
    }

    async fn transition(&self, to: CircuitState) -> Result<QuotaState> {
        let state = self.store.update_circuit_state(to).await?;
        telemetry::record_circuit_transition(to);
        match to {
            CircuitState::Open => warn!(
                provider = self.provider.id(),
                consecutive_failures = state.consecutive_failures,
                timeout_secs = self.settings.breaker.timeout_secs(),
                "circuit opened"
            ),
            CircuitState::HalfOpen => info!(
                provider = self.provider.id(),
                "circuit half-open, admitting trial call"
            ),
            CircuitState::Closed => info!(provider = self.provider.id(), "circuit closed"),
        }
        Ok(state)
    }
}
