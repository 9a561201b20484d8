//! Error types for governed calls

use std::time::Duration;

/// Typed outcome of a failed governed call.
///
/// No variant is retried internally; scheduling a retry is the caller's
/// decision, informed by `retry_after_secs`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Breaker open and its timeout hasn't elapsed. No request was sent.
    #[error("circuit open, retry in {seconds_remaining}s")]
    CircuitOpen { seconds_remaining: u64 },

    /// Provider answered 429. The breaker has been forced open.
    #[error("rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Any other non-2xx answer.
    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("provider transport error: {0}")]
    Transport(String),

    /// Missing credentials or bad endpoint. Raised before any state access.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 2xx answer whose body isn't JSON.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("quota store error: {0}")]
    Store(#[from] quota_store::Error),
}

impl Error {
    /// Seconds the caller should wait before trying again, when known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::CircuitOpen { seconds_remaining } => Some(*seconds_remaining),
            Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::CircuitOpen { .. } => "circuit_open",
            Error::RateLimited { .. } => "rate_limited",
            Error::Provider { .. } => "provider_error",
            Error::Timeout(_) => "timeout",
            Error::Transport(_) => "transport",
            Error::Configuration(_) => "configuration",
            Error::InvalidResponse(_) => "invalid_response",
            Error::Store(_) => "store",
        }
    }
}

impl From<provider::ProviderError> for Error {
    fn from(err: provider::ProviderError) -> Self {
        match err {
            provider::ProviderError::Configuration(msg) => Error::Configuration(msg),
            provider::ProviderError::Timeout(bound) => Error::Timeout(bound),
            provider::ProviderError::Transport(msg) => Error::Transport(msg),
        }
    }
}

/// Result alias for governed calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_hints_only_for_breaker_and_rate_limit() {
        assert_eq!(
            Error::CircuitOpen {
                seconds_remaining: 42
            }
            .retry_after_secs(),
            Some(42)
        );
        assert_eq!(
            Error::RateLimited {
                retry_after_secs: 7
            }
            .retry_after_secs(),
            Some(7)
        );
        assert_eq!(
            Error::Provider {
                status: 500,
                body: String::new()
            }
            .retry_after_secs(),
            None
        );
    }

    #[test]
    fn display_messages_carry_details() {
        assert_eq!(
            Error::CircuitOpen {
                seconds_remaining: 60
            }
            .to_string(),
            "circuit open, retry in 60s"
        );
        assert!(
            Error::Provider {
                status: 503,
                body: "overloaded".into()
            }
            .to_string()
            .contains("503")
        );
        assert_eq!(
            Error::Timeout(Duration::from_secs(30)).to_string(),
            "provider call timed out after 30000ms"
        );
    }

    #[test]
    fn provider_errors_keep_their_class() {
        let err: Error = provider::ProviderError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(5)));

        let err: Error = provider::ProviderError::Configuration("GROQ_API_KEY not set".into()).into();
        assert_eq!(err.to_string(), "configuration error: GROQ_API_KEY not set");

        let err: Error = provider::ProviderError::Transport("connection refused".into()).into();
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn store_errors_convert() {
        let err: Error = quota_store::Error::Io("disk full".into()).into();
        assert_eq!(err.kind(), "store");
        assert!(err.to_string().contains("disk full"));
    }
}
