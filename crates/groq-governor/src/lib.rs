//! Adaptive outbound-call governor for the Groq completion API
//!
//! Throttles calls in proportion to the remaining provider quota and trips a
//! circuit breaker under sustained failure or near-exhausted quota.
//!
//! Per invocation:
//! 1. Read the quota record from the store (defaults on first use)
//! 2. Reject if the circuit is open and the breaker timeout hasn't elapsed;
//!    move to half-open if it has; open proactively if quota is at the floor
//! 3. Pick a strategy tier from the tightest quota ratio
//! 4. Sleep for the tier's delay
//! 5. Dispatch exactly one request (no internal retry)
//! 6. Parse rate limit headers, record the outcome, move the circuit
//!
//! The header parser, strategy selector and breaker decisions are pure; all
//! side effects live in `Governor`.

pub mod breaker;
pub mod error;
pub mod governor;
pub mod headers;
pub mod strategy;
pub mod telemetry;

pub use breaker::CircuitBreaker;
pub use error::{Error, Result};
pub use governor::{Governor, GovernorResponse, GovernorSettings, GovernorStatus};
pub use headers::{parse_rate_limit_headers, retry_after_secs};
pub use strategy::{AdaptiveConfig, AdaptiveStrategy, compute_strategy, config_for};

pub use provider::{ChatMessage, CompletionRequest};
pub use quota_store::{CircuitState, QuotaDefaults, QuotaInfo, QuotaState, QuotaStore};
