//! Outbound admission control: a sliding-window counter persisted in the
//! shared key-value store, wrapped around the upstream HTTP client so no
//! process instance can exceed the catalog API's traffic budget.

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::store::KeyValueStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Key-value key holding the shared window state. One key for the whole
/// deployment: every instance draws from the same admission budget.
const WINDOW_STATE_KEY: &str = "api-rate-limiter";

/// Persisted list of admission timestamps (milliseconds) within the
/// trailing window. Pure storage primitive: get, prune, push.
pub struct WindowStore {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
}

impl WindowStore {
    pub fn new(store: Arc<dyn KeyValueStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Read the persisted timestamps. Garbage or a missing entry reads
    /// as an empty window.
    pub async fn get(&self) -> Result<Vec<u64>> {
        let raw = self.store.get(WINDOW_STATE_KEY).await?;
        Ok(raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default())
    }

    /// Persist a pruned timestamp list. The entry expires well after the
    /// window so an idle deployment cleans up after itself.
    pub async fn put(&self, timestamps: &[u64]) -> Result<()> {
        let serialized = serde_json::to_string(timestamps)
            .map_err(|e| GatewayError::Store(e.to_string()))?;
        self.store
            .set_ex(WINDOW_STATE_KEY, &serialized, self.window * 2)
            .await
    }
}

/// Outcome of one admission check.
#[derive(Debug, PartialEq)]
pub enum Admission {
    Allowed,
    /// Denied; the window frees a slot after this many seconds.
    Denied { retry_after_secs: u64 },
}

/// Sliding-window admission over the persisted state. The read-prune-
/// write sequence is not atomic: concurrent callers can each observe a
/// free slot and both admit, so the effective rate may slightly exceed
/// the limit. Documented approximation; exact limits need an atomic
/// store primitive behind `KeyValueStore`.
pub struct SlidingWindow {
    window_store: WindowStore,
    limit: u32,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: u32, window: Duration) -> Self {
        Self {
            window_store: WindowStore::new(store, window),
            limit,
            window,
        }
    }

    /// Decide admission at `now_ms`, recording the timestamp when
    /// admitted. Never blocks or sleeps; denial is immediate and carries
    /// the retry-after hint.
    pub async fn admit_at(&self, now_ms: u64) -> Result<Admission> {
        let window_ms = self.window.as_millis() as u64;
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut timestamps = self.window_store.get().await?;
        timestamps.retain(|&ts| ts > cutoff);

        if (timestamps.len() as u32) < self.limit {
            timestamps.push(now_ms);
            self.window_store.put(&timestamps).await?;
            return Ok(Admission::Allowed);
        }

        let oldest = timestamps.iter().copied().min().unwrap_or(now_ms);
        let elapsed_ms = now_ms.saturating_sub(oldest);
        let remaining_ms = window_ms.saturating_sub(elapsed_ms);
        // Round up so "retry after N seconds" is never an undershoot.
        let retry_after_secs = (remaining_ms + 999) / 1000;

        Ok(Admission::Denied {
            retry_after_secs: retry_after_secs.max(1),
        })
    }

    pub async fn admit(&self) -> Result<Admission> {
        self.admit_at(now_millis()).await
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Raw upstream response as seen by the client layer: status, headers,
/// final post-redirect URL and the unparsed body.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub final_url: String,
    pub body: String,
}

/// Wraps outbound GETs with admission control. The per-call timeout is
/// `window / limit`, so a slow upstream call can never hold more than
/// one admission slot's worth of time budget.
pub struct RateLimitedDispatcher {
    window: SlidingWindow,
    http: reqwest::Client,
}

impl RateLimitedDispatcher {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.per_call_timeout())
            .build()
            .map_err(|e| {
                GatewayError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            window: SlidingWindow::new(
                store,
                config.max_requests_per_window,
                config.rate_limit_window,
            ),
            http,
        })
    }

    /// Admission check, then a single GET. Fails fast with
    /// `RateLimited` when the window is full; transport failures pass
    /// through with whatever status they carry. No retries here.
    pub async fn dispatch(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse> {
        match self.window.admit().await? {
            Admission::Allowed => {}
            Admission::Denied { retry_after_secs } => {
                tracing::warn!(retry_after_secs, "Outbound rate limit reached");
                return Err(GatewayError::RateLimited { retry_after_secs });
            }
        }

        let response = self.http.get(url).query(query).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        tracing::debug!(status, url = %final_url, "Upstream call completed");

        Ok(UpstreamResponse {
            status,
            headers,
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn window(limit: u32) -> SlidingWindow {
        SlidingWindow::new(MemoryStore::shared(), limit, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn admits_up_to_the_limit_then_denies() {
        let window = window(5);
        let now = 1_700_000_000_000;

        for i in 0..5 {
            assert_eq!(window.admit_at(now + i).await.unwrap(), Admission::Allowed);
        }

        match window.admit_at(now + 5).await.unwrap() {
            Admission::Denied { retry_after_secs } => assert!(retry_after_secs > 0),
            Admission::Allowed => panic!("sixth call must be denied"),
        }
    }

    #[tokio::test]
    async fn denial_clears_once_the_window_slides_past() {
        let window = window(2);
        let now = 1_700_000_000_000;

        assert_eq!(window.admit_at(now).await.unwrap(), Admission::Allowed);
        assert_eq!(window.admit_at(now + 10).await.unwrap(), Admission::Allowed);
        assert!(matches!(
            window.admit_at(now + 20).await.unwrap(),
            Admission::Denied { .. }
        ));

        // 60s after the first admission its timestamp falls out.
        assert_eq!(
            window.admit_at(now + 60_001).await.unwrap(),
            Admission::Allowed
        );
    }

    #[tokio::test]
    async fn retry_after_counts_from_the_oldest_admission() {
        let window = window(1);
        let now = 1_700_000_000_000;

        assert_eq!(window.admit_at(now).await.unwrap(), Admission::Allowed);

        match window.admit_at(now + 15_000).await.unwrap() {
            Admission::Denied { retry_after_secs } => assert_eq!(retry_after_secs, 45),
            Admission::Allowed => panic!("window is full"),
        }
    }

    #[tokio::test]
    async fn garbage_window_state_reads_as_empty() {
        let store = MemoryStore::shared();
        store
            .set_ex(WINDOW_STATE_KEY, "not json at all", Duration::from_secs(60))
            .await
            .unwrap();

        let window = SlidingWindow::new(store, 1, Duration::from_secs(60));
        assert_eq!(
            window.admit_at(1_700_000_000_000).await.unwrap(),
            Admission::Allowed
        );
    }

    #[tokio::test]
    async fn denied_checks_do_not_consume_slots() {
        let window = window(1);
        let now = 1_700_000_000_000;

        assert_eq!(window.admit_at(now).await.unwrap(), Admission::Allowed);
        for i in 1..10 {
            assert!(matches!(
                window.admit_at(now + i).await.unwrap(),
                Admission::Denied { .. }
            ));
        }

        // Only the single admitted timestamp is persisted.
        assert_eq!(
            window.admit_at(now + 60_001).await.unwrap(),
            Admission::Allowed
        );
    }
}
