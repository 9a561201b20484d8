//! Groq provider: one bearer-authenticated POST to the chat completions
//! endpoint per dispatch.

use std::time::Duration;

use common::Secret;
use tracing::debug;

use crate::{
    CompletionRequest, Provider, ProviderError, ProviderFuture, ProviderResponse, Result,
};

/// Groq's OpenAI-compatible chat completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Provider for Groq's completion API.
///
/// The API key is optional at construction so a gateway can start without
/// credentials and report `Configuration` errors per call instead of refusing
/// to boot.
pub struct GroqProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<Secret<String>>,
    timeout: Duration,
}

impl GroqProvider {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<Secret<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            timeout,
        }
    }

    fn classify_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl Provider for GroqProvider {
    fn id(&self) -> &str {
        "groq"
    }

    fn validate(&self) -> Result<()> {
        match &self.api_key {
            Some(key) if !key.expose().trim().is_empty() => {}
            _ => {
                return Err(ProviderError::Configuration(
                    "missing Groq API key (set GROQ_API_KEY or groq.api_key_file)".into(),
                ));
            }
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ProviderError::Configuration(format!(
                "endpoint must start with http:// or https://, got: {}",
                self.endpoint
            )));
        }
        Ok(())
    }

    fn dispatch<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> ProviderFuture<'a, ProviderResponse> {
        Box::pin(async move {
            self.validate()?;
            // validate() guarantees a key is present
            let key = self
                .api_key
                .as_ref()
                .map(|k| k.expose().as_str())
                .unwrap_or_default();

            debug!(model = %request.model, messages = request.messages.len(), "dispatching completion");

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(key)
                .timeout(self.timeout)
                .json(request)
                .send()
                .await
                .map_err(|e| self.classify_send_error(e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| self.classify_send_error(e))?;

            Ok(ProviderResponse {
                status,
                headers,
                body,
            })
        })
    }
}
