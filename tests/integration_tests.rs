use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use bookgate::config::Config;
use bookgate::envelope::ResultEnvelope;
use bookgate::fetcher::CacheAsideFetcher;
use bookgate::filters::FilterSet;
use bookgate::handlers::{AppState, SharedState};
use bookgate::normalizer::FieldMappingNormalizer;
use bookgate::rate_limiter::RateLimitedDispatcher;
use bookgate::server::build_router;
use bookgate::store::MemoryStore;
use bookgate::upstream::{BestsellerSource, UpstreamClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observations from the stub upstream: how often it was hit and with
/// which query parameters.
#[derive(Default)]
struct UpstreamProbe {
    hits: AtomicUsize,
    last_query: Mutex<Option<HashMap<String, String>>>,
}

impl UpstreamProbe {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn last_query(&self) -> Option<HashMap<String, String>> {
        self.last_query.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct StubState {
    probe: Arc<UpstreamProbe>,
    status: StatusCode,
    body: String,
}

async fn stub_handler(
    State(state): State<StubState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    state.probe.hits.fetch_add(1, Ordering::SeqCst);
    *state.probe.last_query.lock().unwrap() = Some(params);
    (state.status, state.body)
}

/// Serve a canned upstream response on an ephemeral port.
async fn spawn_upstream(status: StatusCode, body: &str) -> (String, Arc<UpstreamProbe>) {
    let probe = Arc::new(UpstreamProbe::default());
    let state = StubState {
        probe: probe.clone(),
        status,
        body: body.to_string(),
    };

    let app = Router::new()
        .route(
            "/svc/books/v3/lists/best-sellers/history.json",
            get(stub_handler),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), probe)
}

fn test_config(base_url: &str, limit: u32) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".into(),
        redis_url: String::new(),
        upstream_base_url: base_url.to_string(),
        upstream_version: "v3".into(),
        upstream_api_key: "default-key".into(),
        cache_ttl: Duration::from_secs(600),
        max_requests_per_window: limit,
        rate_limit_window: Duration::from_secs(60),
        field_mapping_path: None,
        log_level: "info".into(),
    }
}

/// Wire the full pipeline against a stub upstream, sharing one
/// in-memory store between the cache and the rate-limiter window.
fn build_pipeline(base_url: &str, limit: u32) -> SharedState {
    let config = test_config(base_url, limit);
    let store = MemoryStore::shared();

    let dispatcher = RateLimitedDispatcher::new(&config, store.clone()).unwrap();
    let upstream = Arc::new(UpstreamClient::new(
        dispatcher,
        FieldMappingNormalizer::with_default_table(),
        config.upstream_base_url.clone(),
        config.upstream_version.clone(),
        config.upstream_api_key.clone(),
    ));
    let fetcher = CacheAsideFetcher::new(store.clone(), upstream, config.cache_ttl);
    Arc::new(AppState { fetcher, store })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn end_to_end_fetch_normalize_cache() {
    let (base_url, probe) = spawn_upstream(
        StatusCode::OK,
        r#"{"results": [{"book_title": "The Shining", "bestseller_rank": 1}]}"#,
    )
    .await;
    let state = build_pipeline(&base_url, 10);

    let filters = FilterSet {
        author: Some("Stephen King".into()),
        ..Default::default()
    };

    let first = state.fetcher.get(&filters).await;
    match &first {
        ResultEnvelope::Success { data, status_code, .. } => {
            assert_eq!(*status_code, 200);
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].title, json!("The Shining"));
            assert_eq!(data[0].rank, json!(1));
            assert_eq!(data[0].author, Value::Null);
        }
        other => panic!("expected success, got {:?}", other),
    }

    // The identical second call is served from the cache.
    let second = state.fetcher.get(&filters).await;
    assert_eq!(second, first);
    assert_eq!(probe.hits(), 1);

    // The upstream saw the resolved default key and the author filter.
    let query = probe.last_query().unwrap();
    assert_eq!(query.get("api-key").map(String::as_str), Some("default-key"));
    assert_eq!(query.get("author").map(String::as_str), Some("Stephen King"));
}

#[tokio::test]
async fn isbn_list_reaches_the_upstream_joined_with_semicolons() {
    let (base_url, probe) = spawn_upstream(StatusCode::OK, r#"{"results": []}"#).await;
    let state = build_pipeline(&base_url, 10);

    let filters = FilterSet {
        isbn: Some(vec!["A".into(), "B".into()]),
        ..Default::default()
    };
    state.fetcher.get(&filters).await;

    let query = probe.last_query().unwrap();
    assert_eq!(query.get("isbn").map(String::as_str), Some("A;B"));
}

#[tokio::test]
async fn upstream_401_is_masked_to_500_with_true_status_in_meta() {
    let (base_url, _) = spawn_upstream(StatusCode::UNAUTHORIZED, "unauthorized").await;
    let state = build_pipeline(&base_url, 10);

    let envelope = state.fetcher.get(&FilterSet::default()).await;

    assert!(!envelope.is_success());
    assert_eq!(envelope.status_code(), 500);
    assert_eq!(envelope.meta().service_status_code, Some(401));
}

#[tokio::test]
async fn upstream_failures_are_retried_on_the_next_call() {
    let (base_url, probe) = spawn_upstream(StatusCode::BAD_GATEWAY, "oops").await;
    let state = build_pipeline(&base_url, 10);

    assert!(!state.fetcher.get(&FilterSet::default()).await.is_success());
    assert!(!state.fetcher.get(&FilterSet::default()).await.is_success());
    // Failures were not cached: both calls reached the upstream.
    assert_eq!(probe.hits(), 2);
}

#[tokio::test]
async fn exhausted_window_yields_a_rate_limited_failure() {
    let (base_url, probe) = spawn_upstream(StatusCode::OK, r#"{"results": []}"#).await;
    let state = build_pipeline(&base_url, 1);

    // Distinct filters so the second call cannot be served from cache.
    let first = state.fetcher
        .get(&FilterSet {
            author: Some("King".into()),
            ..Default::default()
        })
        .await;
    assert!(first.is_success());

    let second = state.fetcher
        .get(&FilterSet {
            author: Some("Christie".into()),
            ..Default::default()
        })
        .await;

    match &second {
        ResultEnvelope::Failure { errors, status_code, .. } => {
            assert_eq!(*status_code, 429);
            assert_eq!(errors["error_kind"], json!("rate_limited"));
            assert!(errors["retry_after_seconds"].as_u64().unwrap() > 0);
        }
        other => panic!("expected rate-limited failure, got {:?}", other),
    }
    assert_eq!(probe.hits(), 1);
}

#[tokio::test]
async fn empty_override_key_fails_without_touching_the_upstream() {
    let (base_url, probe) = spawn_upstream(StatusCode::OK, r#"{"results": []}"#).await;
    let state = build_pipeline(&base_url, 10);

    let envelope = state.fetcher
        .get(&FilterSet {
            client_api_key: Some(String::new()),
            ..Default::default()
        })
        .await;

    assert!(!envelope.is_success());
    assert_eq!(envelope.status_code(), 422);
    assert_eq!(probe.hits(), 0);
}

#[tokio::test]
async fn http_surface_returns_data_with_200() {
    use tower::ServiceExt;

    let (base_url, _) = spawn_upstream(
        StatusCode::OK,
        r#"{"results": [{"title": "It", "rank": 2}]}"#,
    )
    .await;
    let state = build_pipeline(&base_url, 10);
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/bestsellers?author=Stephen%20King")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body[0]["title"], json!("It"));
    assert_eq!(body[0]["rank"], json!(2));
    assert_eq!(body[0]["publisher"], Value::Null);
}

#[tokio::test]
async fn http_surface_maps_empty_results_to_404() {
    use tower::ServiceExt;

    let (base_url, _) = spawn_upstream(StatusCode::OK, r#"{"results": []}"#).await;
    let state = build_pipeline(&base_url, 10);
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/bestsellers?title=Unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_surface_surfaces_failure_status_and_error_map() {
    use tower::ServiceExt;

    let (base_url, _) = spawn_upstream(StatusCode::SERVICE_UNAVAILABLE, "down").await;
    let state = build_pipeline(&base_url, 10);
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/bestsellers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error_kind"], json!("upstream_error"));
}

#[tokio::test]
async fn health_endpoint_reports_store_connectivity() {
    use tower::ServiceExt;

    let (base_url, _) = spawn_upstream(StatusCode::OK, r#"{"results": []}"#).await;
    let state = build_pipeline(&base_url, 10);
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["store_connected"], json!(true));
}

#[tokio::test]
async fn source_trait_is_object_safe_for_test_doubles() {
    let (base_url, _) = spawn_upstream(StatusCode::OK, r#"{"results": []}"#).await;
    let config = test_config(&base_url, 10);
    let store = MemoryStore::shared();

    let dispatcher = RateLimitedDispatcher::new(&config, store).unwrap();
    let upstream: Arc<dyn BestsellerSource> = Arc::new(UpstreamClient::new(
        dispatcher,
        FieldMappingNormalizer::with_default_table(),
        base_url,
        "v3",
        "default-key",
    ));

    let envelope = upstream.fetch(&FilterSet::default()).await;
    assert!(envelope.is_success());
}
