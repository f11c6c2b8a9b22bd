use crate::envelope::ResultEnvelope;
use crate::filters::FilterSet;
use crate::store::KeyValueStore;
use crate::upstream::BestsellerSource;
use std::sync::Arc;
use std::time::Duration;

const CACHE_KEY_PREFIX: &str = "bestsellers_";

/// Cache-aside front for the upstream client: serves cached envelopes by
/// request fingerprint and populates the cache on miss. Only Success
/// envelopes are written, so a failing fetch is retried on the very next
/// call instead of pinning a stale error for the TTL.
pub struct CacheAsideFetcher {
    cache: Arc<dyn KeyValueStore>,
    source: Arc<dyn BestsellerSource>,
    ttl: Duration,
}

impl CacheAsideFetcher {
    pub fn new(
        cache: Arc<dyn KeyValueStore>,
        source: Arc<dyn BestsellerSource>,
        ttl: Duration,
    ) -> Self {
        Self { cache, source, ttl }
    }

    /// Serve from cache when possible, otherwise fetch and populate.
    /// Cache hits are returned unconditionally, never re-validated.
    /// Concurrent misses for one fingerprint are not coalesced; each
    /// invokes the source and the last writer wins.
    pub async fn get(&self, filters: &FilterSet) -> ResultEnvelope {
        let cache_key = format!("{}{}", CACHE_KEY_PREFIX, filters.fingerprint());

        match self.read_cached(&cache_key).await {
            Some(envelope) => {
                tracing::debug!(%cache_key, "Cache hit");
                envelope
            }
            None => {
                tracing::debug!(%cache_key, "Cache miss, fetching upstream");
                let envelope = self.source.fetch(filters).await;
                if envelope.is_success() {
                    self.write_cached(&cache_key, &envelope).await;
                }
                envelope
            }
        }
    }

    async fn read_cached(&self, cache_key: &str) -> Option<ResultEnvelope> {
        let raw = match self.cache.get(cache_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(%cache_key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                // An undecodable entry is useless; drop it and refetch.
                tracing::warn!(%cache_key, error = %e, "Evicting undecodable cache entry");
                if let Err(e) = self.cache.delete(cache_key).await {
                    tracing::warn!(%cache_key, error = %e, "Cache eviction failed");
                }
                None
            }
        }
    }

    /// Best effort: a failed cache write costs a future upstream call,
    /// not this response.
    async fn write_cached(&self, cache_key: &str, envelope: &ResultEnvelope) {
        let serialized = match serde_json::to_string(envelope) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%cache_key, error = %e, "Envelope serialization failed");
                return;
            }
        };

        if let Err(e) = self.cache.set_ex(cache_key, &serialized, self.ttl).await {
            tracing::warn!(%cache_key, error = %e, "Cache write failed");
        }
    }
}
