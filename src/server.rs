use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::fetcher::CacheAsideFetcher;
use crate::handlers::{get_bestsellers, health_check, AppState, SharedState};
use crate::middleware::logging_middleware;
use crate::normalizer::{FieldMappingNormalizer, FieldMappingTable};
use crate::rate_limiter::RateLimitedDispatcher;
use crate::store::{KeyValueStore, MemoryStore, RedisStore};
use crate::upstream::UpstreamClient;
use axum::routing::get;
use axum::{middleware, Router};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct Server {
    app: Router,
    bind_addr: String,
}

impl Server {
    /// Wire the pipeline: store, window-limited dispatcher, upstream
    /// client, cache-aside fetcher, router.
    pub async fn new(config: Config) -> Result<Self> {
        let store = build_store(&config).await?;
        let normalizer = build_normalizer(&config)?;

        let dispatcher = RateLimitedDispatcher::new(&config, store.clone())?;
        let upstream = Arc::new(UpstreamClient::new(
            dispatcher,
            normalizer,
            config.upstream_base_url.clone(),
            config.upstream_version.clone(),
            config.upstream_api_key.clone(),
        ));
        let fetcher = CacheAsideFetcher::new(store.clone(), upstream, config.cache_ttl);

        let state: SharedState = Arc::new(AppState { fetcher, store });
        let app = build_router(state);

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| {
                GatewayError::Configuration(format!("Failed to bind {}: {}", self.bind_addr, e))
            })?;

        tracing::info!("Gateway listening on {}", self.bind_addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Configuration(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Router used by the binary and by integration tests.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/bestsellers", get(get_bestsellers))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

async fn build_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    if config.redis_url.is_empty() {
        tracing::warn!("REDIS_URL is empty, running with an in-process store");
        return Ok(MemoryStore::shared());
    }

    let store = RedisStore::connect(&config.redis_url).await?;
    Ok(Arc::new(store))
}

fn build_normalizer(config: &Config) -> Result<FieldMappingNormalizer> {
    let table = match &config.field_mapping_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                GatewayError::Configuration(format!("Cannot read field mapping {}: {}", path, e))
            })?;
            FieldMappingTable::from_json(&raw)?
        }
        None => FieldMappingTable::default_table(),
    };

    FieldMappingNormalizer::new(table)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        },
    }
}
