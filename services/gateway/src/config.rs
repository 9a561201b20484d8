//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Groq API key is loaded from GROQ_API_KEY or api_key_file, never
//! stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use groq_governor::breaker::{
    DEFAULT_CIRCUIT_BREAKER_TIMEOUT, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_MIN_REQUESTS_REMAINING, DEFAULT_MIN_TOKENS_REMAINING,
};
use groq_governor::governor::DEFAULT_RETRY_AFTER;
use groq_governor::{CircuitBreaker, GovernorSettings, QuotaDefaults};
use quota_store::{DEFAULT_REQUESTS_PER_DAY, DEFAULT_TOKENS_PER_MINUTE};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub groq: GroqConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Serve the admin routes on their own listener. When unset they share
    /// `listen_addr`.
    #[serde(default)]
    pub admin_listen_addr: Option<SocketAddr>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream completion API
#[derive(Debug, Deserialize)]
pub struct GroqConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
    /// Path to a file containing the API key (alternative to GROQ_API_KEY)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
            api_key: None,
            api_key_file: None,
        }
    }
}

/// Quota defaults and breaker thresholds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub requests_per_day: u64,
    pub tokens_per_minute: u64,
    pub circuit_breaker_timeout_ms: u64,
    pub max_consecutive_failures: u32,
    pub min_tokens_remaining: u64,
    pub min_requests_remaining: u64,
    pub default_retry_after_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            requests_per_day: DEFAULT_REQUESTS_PER_DAY,
            tokens_per_minute: DEFAULT_TOKENS_PER_MINUTE,
            circuit_breaker_timeout_ms: DEFAULT_CIRCUIT_BREAKER_TIMEOUT.as_millis() as u64,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            min_tokens_remaining: DEFAULT_MIN_TOKENS_REMAINING,
            min_requests_remaining: DEFAULT_MIN_REQUESTS_REMAINING,
            default_retry_after_secs: DEFAULT_RETRY_AFTER.as_secs(),
        }
    }
}

impl GovernorConfig {
    pub fn quota_defaults(&self) -> QuotaDefaults {
        QuotaDefaults {
            requests_per_day: self.requests_per_day,
            tokens_per_minute: self.tokens_per_minute,
        }
    }

    pub fn settings(&self) -> GovernorSettings {
        GovernorSettings {
            defaults: self.quota_defaults(),
            breaker: CircuitBreaker {
                max_consecutive_failures: self.max_consecutive_failures,
                min_tokens_remaining: self.min_tokens_remaining,
                min_requests_remaining: self.min_requests_remaining,
                timeout: Duration::from_millis(self.circuit_breaker_timeout_ms),
            },
            default_retry_after: Duration::from_secs(self.default_retry_after_secs),
        }
    }
}

/// Quota record persistence
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding the quota record. In-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_endpoint() -> String {
    provider::DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. GROQ_API_KEY env var
    /// 2. api_key_file path from config
    ///
    /// A missing key is not an error here: calls fail with a configuration
    /// error until one is provided.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Some(key) = std::env::var(API_KEY_ENV)
            .ok()
            .and_then(|raw| Secret::from_trimmed(&raw))
        {
            config.groq.api_key = Some(key);
        } else if let Some(ref key_file) = config.groq.api_key_file {
            let raw = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            config.groq.api_key = Secret::from_trimmed(&raw);
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let endpoint = &self.groq.endpoint;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(common::Error::invalid(
                "groq.endpoint",
                format!("must start with http:// or https://, got: {endpoint}"),
            ));
        }
        if self.groq.timeout_secs == 0 {
            return Err(common::Error::invalid(
                "groq.timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::invalid(
                "server.max_connections",
                "must be greater than 0",
            ));
        }

        let governor = &self.governor;
        for (setting, value) in [
            ("governor.requests_per_day", governor.requests_per_day),
            ("governor.tokens_per_minute", governor.tokens_per_minute),
            (
                "governor.max_consecutive_failures",
                u64::from(governor.max_consecutive_failures),
            ),
        ] {
            if value == 0 {
                return Err(common::Error::invalid(setting, "must be greater than 0"));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.groq.timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("groq-governor.toml")
    }
}
