use crate::error::{GatewayError, Result};
use std::env;
use std::time::Duration;

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// Redis connection URL; empty string selects the in-memory store
    pub redis_url: String,
    /// Upstream catalog API base URL
    pub upstream_base_url: String,
    /// Upstream API version segment, e.g. "v3"
    pub upstream_version: String,
    /// Default upstream API key, used when the caller supplies none
    pub upstream_api_key: String,
    /// TTL for cached Success envelopes
    pub cache_ttl: Duration,
    /// Outbound admissions allowed per rolling window
    pub max_requests_per_window: u32,
    /// Rolling window length for the outbound limiter
    pub rate_limit_window: Duration,
    /// Optional path to a field-mapping JSON file overriding the default table
    pub field_mapping_path: Option<String>,
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:3000"),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            upstream_base_url: env_or("UPSTREAM_BASE_URL", "https://api.nytimes.com"),
            upstream_version: env_or("UPSTREAM_API_VERSION", "v3"),
            upstream_api_key: env::var("UPSTREAM_API_KEY").map_err(|_| {
                GatewayError::Configuration("UPSTREAM_API_KEY must be set".to_string())
            })?,
            cache_ttl: Duration::from_secs(parsed_env_or("CACHE_TTL_SECONDS", 600)?),
            max_requests_per_window: parsed_env_or("MAX_REQUESTS_PER_MINUTE", 5)?,
            rate_limit_window: Duration::from_secs(60),
            field_mapping_path: env::var("FIELD_MAPPING_PATH").ok(),
            log_level: env_or("LOG_LEVEL", "info"),
        };

        if config.max_requests_per_window == 0 {
            return Err(GatewayError::Configuration(
                "MAX_REQUESTS_PER_MINUTE must be greater than 0".to_string(),
            ));
        }

        Ok(config)
    }

    /// Per-call timeout budget: one admission slot's worth of window time.
    pub fn per_call_timeout(&self) -> Duration {
        self.rate_limit_window / self.max_requests_per_window
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Configuration(format!("{} is not a valid number", key))),
        Err(_) => Ok(default),
    }
}
