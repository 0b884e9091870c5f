//! Sliding-window rate limiter
//!
//! Per-client, per-endpoint window over a shared sorted-set store. Each
//! check first trims and counts the window; only an admitted request is
//! recorded and refreshes the key's TTL — a denied request never occupies
//! a slot, so a client retrying through a denial storm regains capacity as
//! soon as its admitted entries age out. Store failures fail open — a
//! broken limiter must not take the API down with it.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use priceverse_core::{CoreError, CoreResult};

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Epoch ms when the window fully resets
    pub reset_time_ms: i64,
    /// How long to wait before retrying; never exceeds the window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Shared window store. `count` trims and reads; `record` is called only
/// after admission and is what occupies a slot and bumps the key's TTL.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Drop entries older than the window, then return the remaining count
    async fn count(&self, key: &str, now_ms: i64, window_ms: u64) -> CoreResult<u64>;

    /// Record an admitted request and refresh the key's TTL
    async fn record(&self, key: &str, now_ms: i64, window_ms: u64) -> CoreResult<()>;
}

/// Redis sorted-set implementation using MULTI/EXEC
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::redis(format!("open {url}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::redis(format!("connect: {e}")))?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn count(&self, key: &str, now_ms: i64, window_ms: u64) -> CoreResult<u64> {
        let mut conn = self.conn.clone();
        let cutoff = now_ms - window_ms as i64;

        let (_trimmed, count): (i64, u64) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(cutoff)
            .cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::redis(format!("rate limit count: {e}")))?;

        Ok(count)
    }

    async fn record(&self, key: &str, now_ms: i64, window_ms: u64) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let member = format!("{}-{}", now_ms, rand::thread_rng().gen::<u32>());
        let ttl_secs = window_ms.div_ceil(1000) + 1;

        let (_added, _expired): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(&member)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::redis(format!("rate limit record: {e}")))?;

        Ok(())
    }
}

/// In-memory implementation for tests
#[derive(Default)]
pub struct MemoryRateLimitStore {
    windows: Mutex<HashMap<String, Vec<i64>>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn count(&self, key: &str, now_ms: i64, window_ms: u64) -> CoreResult<u64> {
        let mut windows = self.windows.lock();
        let entries = windows.entry(key.to_string()).or_default();
        let cutoff = now_ms - window_ms as i64;
        entries.retain(|score| *score > cutoff);
        Ok(entries.len() as u64)
    }

    async fn record(&self, key: &str, now_ms: i64, _window_ms: u64) -> CoreResult<()> {
        self.windows
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(now_ms);
        Ok(())
    }
}

/// A store that always fails, for fail-open tests
pub struct BrokenRateLimitStore;

#[async_trait]
impl RateLimitStore for BrokenRateLimitStore {
    async fn count(&self, _key: &str, _now_ms: i64, _window_ms: u64) -> CoreResult<u64> {
        Err(CoreError::redis("store down"))
    }

    async fn record(&self, _key: &str, _now_ms: i64, _window_ms: u64) -> CoreResult<()> {
        Err(CoreError::redis("store down"))
    }
}

pub struct RateLimiter {
    store: std::sync::Arc<dyn RateLimitStore>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        store: std::sync::Arc<dyn RateLimitStore>,
        max_requests: u64,
        window: Duration,
    ) -> Self {
        Self {
            store,
            max_requests,
            window,
        }
    }

    fn key(client: &str, endpoint: Option<&str>) -> String {
        match endpoint {
            Some(endpoint) => format!("ratelimit:{client}:{endpoint}"),
            None => format!("ratelimit:{client}"),
        }
    }

    /// Check one request. At the limit the request is denied without being
    /// recorded; the reported retry-after never exceeds the window.
    pub async fn check(&self, client: &str, endpoint: Option<&str>) -> RateLimitDecision {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = self.window.as_millis() as u64;
        let key = Self::key(client, endpoint);

        let count = match self.store.count(&key, now_ms, window_ms).await {
            Ok(count) => count,
            Err(e) => {
                // Fail open: a limiter outage never blocks traffic
                warn!("[RateLimiter] store error, allowing request: {}", e);
                return RateLimitDecision {
                    allowed: true,
                    remaining: self.max_requests,
                    reset_time_ms: now_ms + window_ms as i64,
                    retry_after_ms: None,
                };
            }
        };

        if count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time_ms: now_ms + window_ms as i64,
                retry_after_ms: Some(window_ms),
            };
        }

        if let Err(e) = self.store.record(&key, now_ms, window_ms).await {
            // Already admitted; the lost slot is the fail-open trade-off
            warn!("[RateLimiter] failed to record request: {}", e);
        }

        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests.saturating_sub(count + 1),
            reset_time_ms: now_ms + window_ms as i64,
            retry_after_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn limiter(max: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryRateLimitStore::new()),
            max,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_denies_after_max() {
        let limiter = limiter(100);
        for i in 0..100 {
            let decision = limiter.check("client-1", None).await;
            assert!(decision.allowed, "request {} should pass", i);
        }
        let denied = limiter.check("client-1", None).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_ms.unwrap() <= 60_000);
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = limiter(3);
        assert_eq!(limiter.check("c", None).await.remaining, 2);
        assert_eq!(limiter.check("c", None).await.remaining, 1);
        assert_eq!(limiter.check("c", None).await.remaining, 0);
        assert!(!limiter.check("c", None).await.allowed);
    }

    #[tokio::test]
    async fn test_denied_requests_do_not_occupy_slots() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = RateLimiter::new(store.clone(), 2, Duration::from_secs(60));

        assert!(limiter.check("c", None).await.allowed);
        assert!(limiter.check("c", None).await.allowed);
        for _ in 0..5 {
            assert!(!limiter.check("c", None).await.allowed);
        }

        // Only the two admitted requests hold window slots; the denials
        // recorded nothing
        let now_ms = chrono::Utc::now().timestamp_millis();
        let count = store.count("ratelimit:c", now_ms, 60_000).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_clients_and_endpoints_isolated() {
        let limiter = limiter(1);
        assert!(limiter.check("a", None).await.allowed);
        assert!(limiter.check("b", None).await.allowed);
        assert!(limiter.check("a", Some("getPrice")).await.allowed);
        assert!(!limiter.check("a", None).await.allowed);
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        let limiter = RateLimiter::new(Arc::new(BrokenRateLimitStore), 1, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.check("c", None).await.allowed);
        }
    }
}
