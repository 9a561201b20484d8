//! Provider abstraction for outbound completion calls
//!
//! Defines the `Provider` trait that decouples the governor from the HTTP
//! client that actually talks to the completion API. `GroqProvider` is the
//! production implementation; tests substitute scripted providers to drive
//! the governor through success, failure and rate-limit outcomes without a
//! network.
//!
//! A provider performs exactly one network attempt per `dispatch` call and
//! hands back the raw status, headers and body. Interpreting those (quota
//! headers, breaker transitions) is the governor's job.

pub mod groq;

pub use groq::{DEFAULT_ENDPOINT, GroqProvider};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// One chat message in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The fields of a completion request the governor needs to dispatch it.
///
/// Serializes directly as the OpenAI-compatible request body. Optional
/// sampling parameters are omitted when unset so the provider applies its
/// own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Raw outcome of a dispatched request, whatever its status.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8, cut to at most `max_chars` characters. Used for
    /// error messages and logs so a large upstream error page doesn't end up
    /// verbatim in every log line.
    pub fn body_excerpt(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.into_owned(),
        }
    }
}

/// Errors from a dispatch attempt that never produced an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credentials or endpoint are missing/invalid. Raised before any network
    /// attempt.
    #[error("provider configuration error: {0}")]
    Configuration(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by provider operations, kept dyn-compatible so the
/// governor can hold an `Arc<dyn Provider>`.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outbound completion API.
pub trait Provider: Send + Sync {
    /// Identifier for logging and metrics (e.g. "groq")
    fn id(&self) -> &str;

    /// Check that credentials and endpoint are usable. Must not touch the
    /// network; the governor calls this before reading quota state so a
    /// misconfigured deployment never counts toward the failure streak.
    fn validate(&self) -> Result<()>;

    /// Send exactly one request. Non-2xx statuses are returned as
    /// `Ok(ProviderResponse)`; only transport-level failures are errors.
    fn dispatch<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> ProviderFuture<'a, ProviderResponse>;
}
