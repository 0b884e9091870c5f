//! Stream aggregator
//!
//! Two concurrent activities: a consumption loop draining the venue event
//! logs into the per-pair trade buffer, and a tick loop that every interval
//! computes a volume-weighted canonical price per base pair, persists it,
//! derives the RUB pair through the fiat rate, and pushes both onto the
//! cache/pub-sub bus and the in-process broadcaster.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use priceverse_core::{
    CheckResult, ComponentHealth, CoreResult, Pair, PricePoint, PriceSnapshot, Trade, Venue,
    VWAP_METHOD,
};

use crate::buffer::TradeBuffer;
use crate::cbr::RateSource;
use crate::price_bus::{PriceBroadcaster, PriceBus};
use crate::repo::{retry_transient, PriceHistoryRepo};
use crate::venue_log::VenueLog;
use crate::vwap::compute_vwap;

/// Consumer group shared by all aggregator instances
pub const CONSUMER_GROUP: &str = "price-aggregator";

/// Entries read per venue per sweep
const READ_COUNT: usize = 100;

/// Blocking read bound; keeps shutdown from waiting on traffic
const READ_BLOCK_MS: u64 = 1_000;

/// Error-free window after which the consecutive-error counter resets
const ERROR_RESET_WINDOW: Duration = Duration::from_secs(60);

/// Storage retry attempts for canonical price writes
const DB_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct StreamAggregatorConfig {
    pub tick_interval: Duration,
    pub window: Duration,
    pub pairs: Vec<Pair>,
    pub venues: Vec<Venue>,
    pub max_consecutive_errors: u32,
    pub price_cache_ttl: Duration,
}

impl Default for StreamAggregatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            window: Duration::from_secs(30),
            pairs: Pair::base_pairs().to_vec(),
            venues: Venue::all().to_vec(),
            max_consecutive_errors: 10,
            price_cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Point-in-time aggregator statistics
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStats {
    pub running: bool,
    pub consumer_id: String,
    pub consecutive_errors: u32,
    pub last_successful_tick: Option<DateTime<Utc>>,
    pub total_ticks: u64,
}

#[derive(Debug, Default)]
struct AggregatorMetrics {
    running: AtomicBool,
    consecutive_errors: AtomicU32,
    last_tick_epoch_ms: AtomicU64,
    total_ticks: AtomicU64,
    tick_errors: AtomicU64,
}

pub struct StreamAggregator {
    config: StreamAggregatorConfig,
    consumer_id: String,
    log: Arc<dyn VenueLog>,
    buffer: Arc<TradeBuffer>,
    prices: Arc<PriceHistoryRepo>,
    rates: Arc<dyn RateSource>,
    bus: Arc<dyn PriceBus>,
    broadcaster: Arc<PriceBroadcaster>,
    metrics: Arc<AggregatorMetrics>,
    last_error_at: parking_lot::Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    handles: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl StreamAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamAggregatorConfig,
        log: Arc<dyn VenueLog>,
        buffer: Arc<TradeBuffer>,
        prices: Arc<PriceHistoryRepo>,
        rates: Arc<dyn RateSource>,
        bus: Arc<dyn PriceBus>,
        broadcaster: Arc<PriceBroadcaster>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let consumer_id = format!("aggregator-{}", std::process::id());
        Self {
            config,
            consumer_id,
            log,
            buffer,
            prices,
            rates,
            bus,
            broadcaster,
            metrics: Arc::new(AggregatorMetrics::default()),
            last_error_at: parking_lot::Mutex::new(None),
            shutdown_tx,
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create the consumer groups and spawn both loops
    pub async fn start(self: Arc<Self>) -> CoreResult<()> {
        for venue in &self.config.venues {
            self.log
                .create_group(*venue, CONSUMER_GROUP, "0", true)
                .await?;
        }

        self.shutdown_tx.send_replace(false);
        self.metrics.running.store(true, Ordering::SeqCst);

        let mut handles = self.handles.lock().await;

        let consumer = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            info!("[Aggregator] consumption loop started ({})", consumer.consumer_id);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let had_error = !consumer.consume_once().await;
                if had_error {
                    let errors = consumer.metrics.consecutive_errors.load(Ordering::SeqCst);
                    if errors >= consumer.config.max_consecutive_errors {
                        error!(
                            "[Aggregator] {} consecutive errors, shutting down consumption",
                            errors
                        );
                        consumer.metrics.running.store(false, Ordering::SeqCst);
                        break;
                    }
                    let delay = Self::error_backoff(errors);
                    warn!("[Aggregator] backing off {:?} after error {}", delay, errors);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
            info!("[Aggregator] consumption loop stopped");
        }));

        let ticker_self = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            info!(
                "[Aggregator] tick loop started ({:?} interval)",
                ticker_self.config.tick_interval
            );
            let mut ticker = interval(ticker_self.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ticker_self.tick_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("[Aggregator] tick loop stopped");
        }));

        Ok(())
    }

    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let mut handles = self.handles.lock().await;
        for task in handles.drain(..) {
            if let Err(e) = task.await {
                warn!("[Aggregator] task join error: {}", e);
            }
        }
        self.metrics.running.store(false, Ordering::SeqCst);
    }

    /// One consumption sweep across all venues. Returns false when any
    /// venue read or ack failed.
    pub async fn consume_once(&self) -> bool {
        let mut swept_clean = true;

        for venue in &self.config.venues {
            let entries = match self
                .log
                .read_group(
                    *venue,
                    CONSUMER_GROUP,
                    &self.consumer_id,
                    READ_COUNT,
                    READ_BLOCK_MS,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("[Aggregator] read from {} failed: {}", venue, e);
                    self.record_error();
                    swept_clean = false;
                    continue;
                }
            };

            for (entry_id, fields) in entries {
                match Trade::from_fields(*venue, &fields) {
                    Ok(trade) => self.buffer.insert(trade),
                    // Poison entries are acked and dropped, not retried
                    Err(e) => debug!("[Aggregator] bad entry {} from {}: {}", entry_id, venue, e),
                }
                if let Err(e) = self.log.ack(*venue, CONSUMER_GROUP, &entry_id).await {
                    warn!("[Aggregator] ack {} on {} failed: {}", entry_id, venue, e);
                    self.record_error();
                    swept_clean = false;
                }
            }
        }

        if swept_clean {
            self.maybe_reset_errors();
        }
        swept_clean
    }

    /// One aggregation tick across all configured base pairs. Per-pair
    /// failures are logged and isolated.
    pub async fn tick_once(&self) {
        for pair in self.config.pairs.clone() {
            if let Err(e) = self.tick_pair(pair).await {
                self.metrics.tick_errors.fetch_add(1, Ordering::SeqCst);
                warn!("[Aggregator] tick failed for {}: {}", pair, e);
            }
        }
        self.metrics
            .last_tick_epoch_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::SeqCst);
        self.metrics.total_ticks.fetch_add(1, Ordering::SeqCst);
    }

    async fn tick_pair(&self, pair: Pair) -> CoreResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let window_start = now_ms - self.config.window.as_millis() as i64;

        let trades = self.buffer.range(pair, window_start, now_ms);
        self.buffer.evict_before(pair, window_start);

        let Some(vwap) = compute_vwap(&trades) else {
            debug!("[Aggregator] no emission for {} this tick", pair);
            return Ok(());
        };

        let usd_point = PricePoint {
            pair,
            price: vwap.price,
            event_time_ms: now_ms,
            method: VWAP_METHOD.to_string(),
            sources: vwap.sources.clone(),
            volume: vwap.total_volume,
        };

        retry_transient(|| self.prices.insert(&usd_point), DB_RETRY_ATTEMPTS).await?;
        self.publish_point(&usd_point).await;

        // Derived RUB pair: any positive rate (fresh, stale, or fallback)
        if let Some(rub_pair) = pair.derived_rub() {
            let rate = self.rates.get_rate();
            if rate.is_usable() {
                let mut sources = vwap.sources.clone();
                sources.push("cbr".to_string());
                let rub_point = PricePoint {
                    pair: rub_pair,
                    price: vwap.price * rate.rate,
                    event_time_ms: now_ms,
                    method: VWAP_METHOD.to_string(),
                    sources,
                    volume: vwap.total_volume,
                };
                retry_transient(|| self.prices.insert(&rub_point), DB_RETRY_ATTEMPTS).await?;
                self.publish_point(&rub_point).await;
            } else {
                warn!("[Aggregator] unusable fiat rate, skipping {}", rub_pair);
            }
        }

        Ok(())
    }

    /// Cache, publish, and broadcast one canonical price. Bus failures are
    /// logged but never fail the tick — the durable row is already written.
    async fn publish_point(&self, point: &PricePoint) {
        let snapshot = PriceSnapshot::from(point);
        if let Err(e) = self
            .bus
            .cache_price(&snapshot, self.config.price_cache_ttl)
            .await
        {
            warn!("[Aggregator] cache write for {} failed: {}", point.pair, e);
        }
        if let Err(e) = self.bus.publish(&snapshot).await {
            warn!("[Aggregator] publish for {} failed: {}", point.pair, e);
        }
        self.broadcaster.send(snapshot);
    }

    fn record_error(&self) {
        self.metrics.consecutive_errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error_at.lock() = Some(Instant::now());
    }

    fn maybe_reset_errors(&self) {
        let mut last_error = self.last_error_at.lock();
        if let Some(at) = *last_error {
            if at.elapsed() >= ERROR_RESET_WINDOW {
                self.metrics.consecutive_errors.store(0, Ordering::SeqCst);
                *last_error = None;
            }
        }
    }

    fn error_backoff(errors: u32) -> Duration {
        Duration::from_secs(1)
            .saturating_mul(1u32 << errors.saturating_sub(1).min(15))
            .min(Duration::from_secs(30))
    }

    pub fn stats(&self) -> AggregatorStats {
        let last_ms = self.metrics.last_tick_epoch_ms.load(Ordering::SeqCst);
        AggregatorStats {
            running: self.metrics.running.load(Ordering::SeqCst),
            consumer_id: self.consumer_id.clone(),
            consecutive_errors: self.metrics.consecutive_errors.load(Ordering::SeqCst),
            last_successful_tick: (last_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_ms as i64))
                .flatten(),
            total_ticks: self.metrics.total_ticks.load(Ordering::SeqCst),
        }
    }

    /// Degraded without a successful tick inside 3x the interval; unhealthy
    /// when stopped or at the consecutive-error limit.
    pub fn health(&self) -> ComponentHealth {
        let stats = self.stats();
        let mut checks = std::collections::BTreeMap::new();

        if !stats.running {
            checks.insert("loop".to_string(), CheckResult::unhealthy("not running"));
        } else if stats.consecutive_errors >= self.config.max_consecutive_errors {
            checks.insert(
                "loop".to_string(),
                CheckResult::unhealthy(format!(
                    "{} consecutive errors",
                    stats.consecutive_errors
                )),
            );
        } else {
            checks.insert("loop".to_string(), CheckResult::healthy());
        }

        let tick_bound = self.config.tick_interval * 3;
        let tick_check = match stats.last_successful_tick {
            Some(last)
                if Utc::now().signed_duration_since(last).num_milliseconds()
                    > tick_bound.as_millis() as i64 =>
            {
                CheckResult::degraded(format!("no tick since {}", last.format("%H:%M:%S")))
            }
            Some(_) => CheckResult::healthy(),
            None => CheckResult::degraded("no tick yet"),
        };
        checks.insert("tick".to_string(), tick_check);

        ComponentHealth::from_checks(checks)
    }
}
