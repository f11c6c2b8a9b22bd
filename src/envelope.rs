use crate::error::GatewayError;
use crate::normalizer::NormalizedRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Diagnostic context attached to every envelope. Carries upstream
/// response details for operators; never business data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// Upstream response headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Final URL after redirects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The status code the upstream actually answered with, preserved
    /// here even when the envelope's own status masks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_status_code: Option<u16>,
}

/// Uniform result wrapper returned by every core operation. Immutable
/// once constructed; serializable because cached copies are stored as
/// JSON in the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResultEnvelope {
    Success {
        data: Vec<NormalizedRecord>,
        status_code: u16,
        meta: EnvelopeMeta,
    },
    Failure {
        message: String,
        errors: BTreeMap<String, Value>,
        status_code: u16,
        meta: EnvelopeMeta,
    },
}

impl ResultEnvelope {
    pub fn success(data: Vec<NormalizedRecord>, status_code: u16, meta: EnvelopeMeta) -> Self {
        ResultEnvelope::Success {
            data,
            status_code,
            meta,
        }
    }

    pub fn failure(
        message: impl Into<String>,
        errors: BTreeMap<String, Value>,
        status_code: u16,
        meta: EnvelopeMeta,
    ) -> Self {
        ResultEnvelope::Failure {
            message: message.into(),
            errors,
            status_code,
            meta,
        }
    }

    /// Fold a pipeline error into a Failure envelope: message and kind
    /// tag from the error, status from the error when it carries one.
    pub fn from_error(err: &GatewayError) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert("error_kind".to_string(), Value::String(err.kind().to_string()));

        if let GatewayError::RateLimited { retry_after_secs } = err {
            errors.insert(
                "retry_after_seconds".to_string(),
                Value::from(*retry_after_secs),
            );
        }

        ResultEnvelope::Failure {
            message: err.to_string(),
            errors,
            status_code: err.status_code(),
            meta: EnvelopeMeta::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ResultEnvelope::Success { status_code, .. } => *status_code,
            ResultEnvelope::Failure { status_code, .. } => *status_code,
        }
    }

    pub fn meta(&self) -> &EnvelopeMeta {
        match self {
            ResultEnvelope::Success { meta, .. } => meta,
            ResultEnvelope::Failure { meta, .. } => meta,
        }
    }
}
