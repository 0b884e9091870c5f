//! Price cache, pub/sub, and in-process broadcast
//!
//! Only the stream aggregator writes; everyone else reads. Cached prices
//! carry their emission timestamp so readers can treat anything older than
//! the staleness bound as a miss. Streaming subscribers hang off a bounded
//! broadcast channel: when a subscriber lags, the oldest entries are dropped
//! and a warning is logged on the receive side.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use priceverse_core::{CoreError, CoreResult, Pair, PriceSnapshot};

fn price_key(pair: Pair) -> String {
    format!("price:{pair}")
}

/// External cache + pub/sub surface
#[async_trait]
pub trait PriceBus: Send + Sync {
    /// Cache under `price:{pair}` with a TTL
    async fn cache_price(&self, snapshot: &PriceSnapshot, ttl: Duration) -> CoreResult<()>;

    /// Read the cached price; entries older than `max_age` are a miss
    async fn cached_price(&self, pair: Pair, max_age: Duration) -> CoreResult<Option<PriceSnapshot>>;

    /// Publish on the `price:{pair}` channel
    async fn publish(&self, snapshot: &PriceSnapshot) -> CoreResult<()>;

    /// Liveness round-trip for the health probe
    async fn ping(&self) -> CoreResult<()>;
}

/// Redis implementation: `SET EX` + `PUBLISH`
pub struct RedisPriceBus {
    conn: ConnectionManager,
}

impl RedisPriceBus {
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
impl PriceBus for RedisPriceBus {
    async fn cache_price(&self, snapshot: &PriceSnapshot, ttl: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| CoreError::internal(format!("serialize snapshot: {e}")))?;
        let _: () = conn
            .set_ex(price_key(snapshot.pair), payload, ttl.as_secs())
            .await
            .map_err(|e| CoreError::redis(format!("set price: {e}")))?;
        Ok(())
    }

    async fn cached_price(
        &self,
        pair: Pair,
        max_age: Duration,
    ) -> CoreResult<Option<PriceSnapshot>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(price_key(pair))
            .await
            .map_err(|e| CoreError::redis(format!("get price: {e}")))?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let snapshot: PriceSnapshot = serde_json::from_str(&payload)
            .map_err(|e| CoreError::redis(format!("parse cached price: {e}")))?;
        let age = Utc::now().signed_duration_since(snapshot.timestamp);
        if age.num_seconds() > max_age.as_secs() as i64 {
            debug!("[PriceBus] cached {} is {}s old, treating as miss", pair, age.num_seconds());
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    async fn publish(&self, snapshot: &PriceSnapshot) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| CoreError::internal(format!("serialize snapshot: {e}")))?;
        let _: () = conn
            .publish(price_key(snapshot.pair), payload)
            .await
            .map_err(|e| CoreError::redis(format!("publish price: {e}")))?;
        Ok(())
    }

    async fn ping(&self) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::redis(format!("ping: {e}")))?;
        Ok(())
    }
}

/// In-memory implementation for hermetic tests
#[derive(Default)]
pub struct MemoryPriceBus {
    cache: Mutex<HashMap<Pair, PriceSnapshot>>,
    published: Mutex<Vec<PriceSnapshot>>,
}

impl MemoryPriceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PriceSnapshot> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl PriceBus for MemoryPriceBus {
    async fn cache_price(&self, snapshot: &PriceSnapshot, _ttl: Duration) -> CoreResult<()> {
        self.cache.lock().insert(snapshot.pair, snapshot.clone());
        Ok(())
    }

    async fn cached_price(
        &self,
        pair: Pair,
        max_age: Duration,
    ) -> CoreResult<Option<PriceSnapshot>> {
        let cached = self.cache.lock().get(&pair).cloned();
        Ok(cached.filter(|snapshot| {
            Utc::now().signed_duration_since(snapshot.timestamp).num_seconds()
                <= max_age.as_secs() as i64
        }))
    }

    async fn publish(&self, snapshot: &PriceSnapshot) -> CoreResult<()> {
        self.published.lock().push(snapshot.clone());
        Ok(())
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// In-process fan-out to streaming RPC subscribers
pub struct PriceBroadcaster {
    tx: broadcast::Sender<PriceSnapshot>,
}

impl PriceBroadcaster {
    /// `capacity` bounds each subscriber's queue; the channel drops the
    /// oldest entries when a subscriber falls behind.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceSnapshot> {
        self.tx.subscribe()
    }

    pub fn send(&self, snapshot: PriceSnapshot) {
        // No subscribers is not an error
        let _ = self.tx.send(snapshot);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(pair: Pair, age_secs: i64) -> PriceSnapshot {
        PriceSnapshot {
            pair,
            price: dec!(45000),
            timestamp: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_memory_bus_round_trip() {
        let bus = MemoryPriceBus::new();
        bus.cache_price(&snapshot(Pair::BtcUsd, 0), Duration::from_secs(60))
            .await
            .unwrap();
        let cached = bus
            .cached_price(Pair::BtcUsd, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(cached.is_some());
        assert!(bus
            .cached_price(Pair::EthUsd, Duration::from_secs(120))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_cached_price_is_a_miss() {
        let bus = MemoryPriceBus::new();
        bus.cache_price(&snapshot(Pair::BtcUsd, 200), Duration::from_secs(60))
            .await
            .unwrap();
        let cached = bus
            .cached_price(Pair::BtcUsd, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_broadcaster_drops_oldest_on_lag() {
        let broadcaster = PriceBroadcaster::new(2);
        let mut rx = broadcaster.subscribe();
        for i in 0..5 {
            broadcaster.send(PriceSnapshot {
                pair: Pair::BtcUsd,
                price: Decimal::from(i),
                timestamp: Utc::now(),
            });
        }
        // The first recv reports the lag, then the newest entries arrive
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {:?}", other),
        }
        let newest = rx.recv().await.unwrap();
        assert_eq!(newest.price, Decimal::from(3));
    }
}
