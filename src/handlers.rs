use crate::envelope::ResultEnvelope;
use crate::fetcher::CacheAsideFetcher;
use crate::filters::FilterSet;
use crate::store::KeyValueStore;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub fetcher: CacheAsideFetcher,
    pub store: Arc<dyn KeyValueStore>,
}

/// Inbound query parameters for the bestsellers listing. `isbn` accepts
/// a comma-separated list.
#[derive(Debug, Deserialize, Validate)]
pub struct BestsellersQuery {
    #[validate(length(min = 1, message = "author cannot be empty"))]
    pub author: Option<String>,
    #[validate(length(min = 1, message = "title cannot be empty"))]
    pub title: Option<String>,
    pub offset: Option<u32>,
    pub isbn: Option<String>,
    pub nyt_api_key: Option<String>,
}

impl From<BestsellersQuery> for FilterSet {
    fn from(query: BestsellersQuery) -> Self {
        FilterSet {
            author: query.author,
            title: query.title,
            offset: query.offset,
            isbn: query.isbn.map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            client_api_key: query.nyt_api_key,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store_connected: bool,
}

/// Fetch bestsellers: validate the query, run the cache-aside pipeline,
/// translate the envelope to a wire response.
pub async fn get_bestsellers(
    State(state): State<SharedState>,
    Query(query): Query<BestsellersQuery>,
) -> Response {
    if let Err(validation) = query.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "errors": validation })),
        )
            .into_response();
    }

    let filters = FilterSet::from(query);
    let envelope = state.fetcher.get(&filters).await;

    envelope_to_response(envelope)
}

/// Wire mapping: Success with data is 200 with the data array, Success
/// with nothing found is 404, Failure answers with the envelope's own
/// status and error map. Failures are logged here, at the boundary.
fn envelope_to_response(envelope: ResultEnvelope) -> Response {
    match envelope {
        ResultEnvelope::Success { data, status_code, .. } => {
            let status = if data.is_empty() {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::from_u16(status_code).unwrap_or(StatusCode::OK)
            };
            (status, Json(data)).into_response()
        }
        ResultEnvelope::Failure {
            message,
            errors,
            status_code,
            meta,
        } => {
            tracing::error!(
                %message,
                status_code,
                service_status_code = ?meta.service_status_code,
                errors = %serde_json::to_string(&errors).unwrap_or_default(),
                "Bestseller fetch failed"
            );

            (
                StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(errors),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store_connected = state.store.ping().await.is_ok();

    let health = HealthResponse {
        // Degraded, not down: the pipeline still answers, every call
        // just goes upstream.
        status: if store_connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store_connected,
    };

    Json(health)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_maps_to_filters_with_isbn_splitting() {
        let query = BestsellersQuery {
            author: Some("Stephen King".into()),
            title: None,
            offset: Some(20),
            isbn: Some("9781234567890, 1234567890".into()),
            nyt_api_key: Some("caller-key".into()),
        };

        let filters = FilterSet::from(query);
        assert_eq!(filters.author.as_deref(), Some("Stephen King"));
        assert_eq!(filters.offset, Some(20));
        assert_eq!(
            filters.isbn,
            Some(vec!["9781234567890".to_string(), "1234567890".to_string()])
        );
        assert_eq!(filters.client_api_key.as_deref(), Some("caller-key"));
    }

    #[test]
    fn empty_isbn_segments_are_dropped() {
        let query = BestsellersQuery {
            author: None,
            title: None,
            offset: None,
            isbn: Some("A,,B,".into()),
            nyt_api_key: None,
        };

        let filters = FilterSet::from(query);
        assert_eq!(filters.isbn, Some(vec!["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn empty_author_fails_validation() {
        let query = BestsellersQuery {
            author: Some(String::new()),
            title: None,
            offset: None,
            isbn: None,
            nyt_api_key: None,
        };

        assert!(query.validate().is_err());
    }
}
