use crate::envelope::{EnvelopeMeta, ResultEnvelope};
use crate::error::GatewayError;
use crate::filters::FilterSet;
use crate::normalizer::FieldMappingNormalizer;
use crate::rate_limiter::{RateLimitedDispatcher, UpstreamResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Upstream path to the bestseller history listing.
const BESTSELLERS_PATH: &str = "lists/best-sellers/history.json";

/// Source of bestseller envelopes. The cache-aside fetcher only knows
/// this seam, so tests can swap the real client for a stub.
#[async_trait]
pub trait BestsellerSource: Send + Sync {
    async fn fetch(&self, filters: &FilterSet) -> ResultEnvelope;
}

/// Builds catalog API requests, dispatches them through the rate
/// limiter, and normalizes response records. Every error becomes a
/// Failure envelope; nothing escapes as a fault.
pub struct UpstreamClient {
    dispatcher: RateLimitedDispatcher,
    normalizer: FieldMappingNormalizer,
    base_url: String,
    version: String,
    default_api_key: String,
}

impl UpstreamClient {
    pub fn new(
        dispatcher: RateLimitedDispatcher,
        normalizer: FieldMappingNormalizer,
        base_url: impl Into<String>,
        version: impl Into<String>,
        default_api_key: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            normalizer,
            base_url: base_url.into(),
            version: version.into(),
            default_api_key: default_api_key.into(),
        }
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/svc/books/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.version,
            BESTSELLERS_PATH
        )
    }

    /// Caller override wins when present; an override that is present
    /// but empty is a local validation failure, raised before any
    /// network activity.
    fn effective_api_key(&self, filters: &FilterSet) -> Result<String, GatewayError> {
        match &filters.client_api_key {
            Some(key) if key.is_empty() => Err(GatewayError::Validation(
                "API key cannot be empty".to_string(),
            )),
            Some(key) => Ok(key.clone()),
            None => Ok(self.default_api_key.clone()),
        }
    }

    fn handle_response(&self, response: UpstreamResponse) -> ResultEnvelope {
        let service_status = response.status;

        // Any upstream non-2xx means we built the request wrong: every
        // parameter sent is derived from data this service controls, so
        // the caller sees a fixed 500 and the true status lands in meta.
        if !(200..300).contains(&service_status) {
            let errors = BTreeMap::from([
                ("error_kind".to_string(), Value::String("upstream_error".into())),
                ("response".to_string(), Value::String(response.body)),
            ]);
            return ResultEnvelope::failure(
                "Upstream API request failed",
                errors,
                500,
                EnvelopeMeta {
                    headers: response.headers,
                    url: Some(response.final_url),
                    service_status_code: Some(service_status),
                },
            );
        }

        let results = match serde_json::from_str::<Value>(&response.body) {
            Ok(Value::Object(mut map)) => match map.remove("results") {
                Some(Value::Array(results)) => results,
                _ => {
                    return ResultEnvelope::from_error(&GatewayError::Deserialization(
                        "Response body has no 'results' array".to_string(),
                    ))
                }
            },
            Ok(_) => {
                return ResultEnvelope::from_error(&GatewayError::Deserialization(
                    "Response body is not a JSON object".to_string(),
                ))
            }
            Err(e) => {
                return ResultEnvelope::from_error(&GatewayError::Deserialization(format!(
                    "Response body is not valid JSON: {}",
                    e
                )))
            }
        };

        let data = results
            .iter()
            .map(|raw| self.normalizer.normalize(raw))
            .collect();

        ResultEnvelope::success(
            data,
            200,
            EnvelopeMeta {
                headers: response.headers,
                url: Some(response.final_url),
                service_status_code: Some(service_status),
            },
        )
    }
}

#[async_trait]
impl BestsellerSource for UpstreamClient {
    async fn fetch(&self, filters: &FilterSet) -> ResultEnvelope {
        let api_key = match self.effective_api_key(filters) {
            Ok(key) => key,
            Err(err) => return ResultEnvelope::from_error(&err),
        };

        let mut query = vec![("api-key", api_key)];
        query.extend(filters.to_query_params());

        match self.dispatcher.dispatch(&self.endpoint_url(), &query).await {
            Ok(response) => self.handle_response(response),
            Err(err) => {
                tracing::warn!(error = %err, "Upstream fetch failed");
                ResultEnvelope::from_error(&err)
            }
        }
    }
}
