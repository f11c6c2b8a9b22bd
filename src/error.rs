use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Every failure mode of the fetch pipeline. None of these escape the
/// public operations as panics; they are folded into Failure envelopes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Local input rejection, raised before any network call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Admission denied by the outbound sliding-window limiter.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Network-level failure (connect, timeout, protocol).
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// A 2xx upstream body that could not be decoded.
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Key-value store (cache / window counter) failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Bad process configuration. Fatal at load time, never per-request.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Short machine-readable tag used in Failure envelope error maps.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Transport { .. } => "transport_error",
            GatewayError::Deserialization(_) => "deserialization_error",
            GatewayError::Store(_) => "store_error",
            GatewayError::Configuration(_) => "configuration_error",
        }
    }

    /// Envelope status for this error: the status the error carries when
    /// it carries one, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 422,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Transport { status, .. } => status.unwrap_or(500),
            GatewayError::Deserialization(_) => 500,
            GatewayError::Store(_) => 503,
            GatewayError::Configuration(_) => 500,
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_when_carried() {
        assert_eq!(GatewayError::Validation("empty key".into()).status_code(), 422);
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 12 }.status_code(),
            429
        );
        assert_eq!(
            GatewayError::Transport { message: "timeout".into(), status: None }.status_code(),
            500
        );
        assert_eq!(
            GatewayError::Transport { message: "bad gateway".into(), status: Some(502) }
                .status_code(),
            502
        );
    }

    #[test]
    fn kinds_are_stable_tags() {
        assert_eq!(GatewayError::Deserialization("eof".into()).kind(), "deserialization_error");
        assert_eq!(GatewayError::RateLimited { retry_after_secs: 1 }.kind(), "rate_limited");
    }
}
