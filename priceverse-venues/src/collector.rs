//! Collector base
//!
//! Drives one venue adapter: owns the socket, the reconnect policy, the
//! keep-alive timer, and the normalized-trade hand-off to the venue event
//! log. Parse failures are silent drops at debug level; socket errors bump
//! the error counter and trigger reconnection, never an RPC-visible failure.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use priceverse_core::{CheckResult, ComponentHealth, CoreResult, Trade};

use crate::adapter::{VenueAdapter, VenueMessage};

/// Where accepted trades go (the venue event log producer side)
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn append(&self, trade: &Trade) -> CoreResult<String>;
}

/// Reconnect base delay
const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling
const RECONNECT_DELAY_CAP: Duration = Duration::from_secs(30);

/// Socket connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// No trades for this long marks the collector degraded
const STALE_FEED_AFTER: Duration = Duration::from_secs(60);

/// Collector tuning knobs
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub max_reconnect_attempts: u32,
    /// Consecutive failures that open the explicit-reconnect breaker
    pub breaker_failure_threshold: u32,
    /// Window the failures must fall within
    pub breaker_window: Duration,
    /// Cooldown enforced while the breaker is open
    pub breaker_cooldown: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            breaker_failure_threshold: 5,
            breaker_window: Duration::from_secs(60),
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// Errors surfaced by collector control operations
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("collector already running")]
    AlreadyRunning,

    #[error("reconnect circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },
}

/// Point-in-time collector statistics
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStats {
    pub venue: String,
    pub connected: bool,
    pub trades_received: u64,
    pub error_count: u64,
    pub last_trade_wallclock: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub disconnected_since: Option<DateTime<Utc>>,
}

/// Thread-safe counters shared between the loop and readers
#[derive(Debug, Default)]
struct CollectorMetrics {
    connected: AtomicBool,
    trades_received: AtomicU64,
    error_count: AtomicU64,
    last_trade_epoch_ms: AtomicU64,
    reconnect_attempts: AtomicU32,
    disconnected_since_ms: AtomicU64,
    terminally_down: AtomicBool,
}

impl CollectorMetrics {
    fn record_trade(&self) {
        self.trades_received.fetch_add(1, Ordering::SeqCst);
        self.last_trade_epoch_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::SeqCst);
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if connected {
            self.disconnected_since_ms.store(0, Ordering::SeqCst);
        } else {
            self.disconnected_since_ms
                .compare_exchange(
                    0,
                    Utc::now().timestamp_millis() as u64,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .ok();
        }
    }
}

/// Sliding-window circuit breaker guarding explicit reconnect requests
#[derive(Debug)]
struct CircuitBreaker {
    failures: parking_lot::Mutex<Vec<Instant>>,
    opened_at: parking_lot::Mutex<Option<Instant>>,
    threshold: u32,
    window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            failures: parking_lot::Mutex::new(Vec::new()),
            opened_at: parking_lot::Mutex::new(None),
            threshold,
            window,
            cooldown,
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.retain(|t| now.duration_since(*t) < self.window);
        failures.push(now);
        if failures.len() as u32 >= self.threshold {
            *self.opened_at.lock() = Some(now);
            failures.clear();
        }
    }

    fn record_success(&self) {
        self.failures.lock().clear();
        *self.opened_at.lock() = None;
    }

    /// Remaining cooldown if the breaker is open
    fn open_for(&self) -> Option<Duration> {
        let mut opened = self.opened_at.lock();
        if let Some(at) = *opened {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                return Some(self.cooldown - elapsed);
            }
            *opened = None;
        }
        None
    }
}

/// A supervised venue collector
pub struct Collector {
    adapter: Arc<dyn VenueAdapter>,
    sink: Arc<dyn TradeSink>,
    config: CollectorConfig,
    metrics: Arc<CollectorMetrics>,
    breaker: Arc<CircuitBreaker>,
    shutdown_tx: watch::Sender<bool>,
    reconnect_notify: Arc<Notify>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Collector {
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        sink: Arc<dyn TradeSink>,
        config: CollectorConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold,
            config.breaker_window,
            config.breaker_cooldown,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            adapter,
            sink,
            config,
            metrics: Arc::new(CollectorMetrics::default()),
            breaker,
            shutdown_tx,
            reconnect_notify: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Begin the connection loop. Idempotent after `stop()`.
    pub async fn start(&self) -> Result<(), CollectorError> {
        let mut handle = self.handle.lock().await;
        if let Some(task) = handle.as_ref() {
            if !task.is_finished() {
                return Err(CollectorError::AlreadyRunning);
            }
        }

        self.shutdown_tx.send_replace(false);
        self.metrics.terminally_down.store(false, Ordering::SeqCst);

        let adapter = Arc::clone(&self.adapter);
        let sink = Arc::clone(&self.sink);
        let metrics = Arc::clone(&self.metrics);
        let breaker = Arc::clone(&self.breaker);
        let reconnect_notify = Arc::clone(&self.reconnect_notify);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let config = self.config.clone();

        *handle = Some(tokio::spawn(async move {
            Self::connection_loop(
                adapter,
                sink,
                metrics,
                breaker,
                reconnect_notify,
                shutdown_rx,
                config,
            )
            .await;
        }));

        Ok(())
    }

    /// Request a graceful close; subsequent frames are dropped.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.handle.lock().await.take() {
            if let Err(e) = task.await {
                warn!("[{}] collector task join error: {}", self.adapter.venue(), e);
            }
        }
        self.metrics.set_connected(false);
    }

    /// Force an immediate reconnect, subject to the circuit breaker.
    pub fn reconnect(&self) -> Result<(), CollectorError> {
        if let Some(retry_in) = self.breaker.open_for() {
            return Err(CollectorError::CircuitOpen { retry_in });
        }
        self.reconnect_notify.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> CollectorStats {
        let last_ms = self.metrics.last_trade_epoch_ms.load(Ordering::SeqCst);
        let disc_ms = self.metrics.disconnected_since_ms.load(Ordering::SeqCst);
        CollectorStats {
            venue: self.adapter.venue().to_string(),
            connected: self.metrics.connected.load(Ordering::SeqCst),
            trades_received: self.metrics.trades_received.load(Ordering::SeqCst),
            error_count: self.metrics.error_count.load(Ordering::SeqCst),
            last_trade_wallclock: (last_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_ms as i64))
                .flatten(),
            reconnect_attempts: self.metrics.reconnect_attempts.load(Ordering::SeqCst),
            disconnected_since: (disc_ms > 0)
                .then(|| DateTime::from_timestamp_millis(disc_ms as i64))
                .flatten(),
        }
    }

    /// Degraded when the feed is silent for over a minute; unhealthy when
    /// the socket is down.
    pub fn health(&self) -> ComponentHealth {
        let stats = self.stats();
        let mut checks = std::collections::BTreeMap::new();

        if stats.connected {
            checks.insert("connection".to_string(), CheckResult::healthy());
            let feed = match stats.last_trade_wallclock {
                Some(last)
                    if Utc::now().signed_duration_since(last).num_seconds()
                        > STALE_FEED_AFTER.as_secs() as i64 =>
                {
                    CheckResult::degraded(format!(
                        "no trades since {}",
                        last.format("%H:%M:%S")
                    ))
                }
                Some(_) => CheckResult::healthy(),
                None => CheckResult::degraded("no trades received yet"),
            };
            checks.insert("feed".to_string(), feed);
        } else if self.metrics.terminally_down.load(Ordering::SeqCst) {
            checks.insert(
                "connection".to_string(),
                CheckResult::unhealthy("reconnect attempts exhausted"),
            );
        } else {
            checks.insert(
                "connection".to_string(),
                CheckResult::unhealthy("disconnected"),
            );
        }

        ComponentHealth::from_checks(checks)
    }

    async fn connection_loop(
        adapter: Arc<dyn VenueAdapter>,
        sink: Arc<dyn TradeSink>,
        metrics: Arc<CollectorMetrics>,
        breaker: Arc<CircuitBreaker>,
        reconnect_notify: Arc<Notify>,
        mut shutdown_rx: watch::Receiver<bool>,
        config: CollectorConfig,
    ) {
        let venue = adapter.venue();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let session = match adapter.session().await {
                Ok(session) => session,
                Err(e) => {
                    warn!("[{}] session setup failed: {}", venue, e);
                    metrics.record_error();
                    breaker.record_failure();
                    if Self::backoff_or_give_up(&venue, &metrics, &mut shutdown_rx, &config).await {
                        break;
                    }
                    continue;
                }
            };

            info!("[{}] connecting to {}", venue, session.url);

            let connect = timeout(CONNECT_TIMEOUT, connect_async(session.url.as_str())).await;
            let ws_stream = match connect {
                Ok(Ok((stream, _))) => stream,
                Ok(Err(e)) => {
                    error!("[{}] connection failed: {}", venue, e);
                    metrics.record_error();
                    breaker.record_failure();
                    if Self::backoff_or_give_up(&venue, &metrics, &mut shutdown_rx, &config).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    error!("[{}] connect timed out after {:?}", venue, CONNECT_TIMEOUT);
                    metrics.record_error();
                    breaker.record_failure();
                    if Self::backoff_or_give_up(&venue, &metrics, &mut shutdown_rx, &config).await {
                        break;
                    }
                    continue;
                }
            };

            info!("[{}] connected", venue);
            metrics.set_connected(true);
            metrics.reconnect_attempts.store(0, Ordering::SeqCst);
            breaker.record_success();

            let (mut write, mut read) = ws_stream.split();

            // Venues without a handshake subscribe straight away
            let mut subscribed = false;
            if !session.requires_welcome {
                for payload in adapter.subscribe_payloads() {
                    if let Err(e) = write.send(Message::Text(payload.into())).await {
                        warn!("[{}] failed to send subscribe: {}", venue, e);
                    }
                }
                subscribed = true;
            }

            let ping_interval = session.ping_interval.unwrap_or(Duration::from_secs(3600));
            let mut heartbeat = interval(ping_interval);
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            heartbeat.tick().await; // first tick fires immediately, skip it
            let ping_enabled = session.ping_interval.is_some();

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("[{}] stop requested, closing socket", venue);
                            let _ = write.send(Message::Close(None)).await;
                            metrics.set_connected(false);
                            return;
                        }
                    }

                    _ = reconnect_notify.notified() => {
                        info!("[{}] explicit reconnect requested", venue);
                        break;
                    }

                    _ = heartbeat.tick(), if ping_enabled => {
                        if let Some(payload) = adapter.ping_payload() {
                            if let Err(e) = write.send(Message::Text(payload.into())).await {
                                warn!("[{}] ping failed: {}", venue, e);
                                break;
                            }
                        }
                    }

                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match adapter.parse_message(&text) {
                                    VenueMessage::Trades(trades) => {
                                        for trade in trades {
                                            metrics.record_trade();
                                            if let Err(e) = sink.append(&trade).await {
                                                metrics.record_error();
                                                warn!(
                                                    "[{}] failed to append trade {}: {}",
                                                    venue, trade.venue_trade_id, e
                                                );
                                            }
                                        }
                                    }
                                    VenueMessage::Welcome => {
                                        if !subscribed {
                                            debug!("[{}] welcome received, subscribing", venue);
                                            for payload in adapter.subscribe_payloads() {
                                                if let Err(e) =
                                                    write.send(Message::Text(payload.into())).await
                                                {
                                                    warn!("[{}] subscribe failed: {}", venue, e);
                                                }
                                            }
                                            subscribed = true;
                                        }
                                    }
                                    VenueMessage::Ack => {
                                        debug!("[{}] subscription acknowledged", venue);
                                    }
                                    VenueMessage::Ping(reply) => {
                                        if let Err(e) =
                                            write.send(Message::Text(reply.into())).await
                                        {
                                            warn!("[{}] pong failed: {}", venue, e);
                                            break;
                                        }
                                    }
                                    VenueMessage::Ignore => {
                                        debug!("[{}] dropped frame", venue);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if write.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("[{}] connection closed by server", venue);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("[{}] socket error: {}", venue, e);
                                metrics.record_error();
                                break;
                            }
                            None => {
                                info!("[{}] stream ended", venue);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }

            metrics.set_connected(false);

            if *shutdown_rx.borrow() {
                break;
            }
            breaker.record_failure();
            if Self::backoff_or_give_up(&venue, &metrics, &mut shutdown_rx, &config).await {
                break;
            }
        }

        metrics.set_connected(false);
    }

    /// Sleep the exponential backoff, or return true when attempts are
    /// exhausted and the collector should stay down.
    async fn backoff_or_give_up(
        venue: &priceverse_core::Venue,
        metrics: &CollectorMetrics,
        shutdown_rx: &mut watch::Receiver<bool>,
        config: &CollectorConfig,
    ) -> bool {
        let attempts = metrics.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > config.max_reconnect_attempts {
            error!(
                "[{}] max reconnect attempts ({}) reached, staying down",
                venue, config.max_reconnect_attempts
            );
            metrics.terminally_down.store(true, Ordering::SeqCst);
            return true;
        }

        let delay = RECONNECT_DELAY_BASE
            .saturating_mul(1u32 << attempts.min(15))
            .min(RECONNECT_DELAY_CAP);
        info!("[{}] reconnecting in {:?} (attempt {})", venue, delay, attempts);

        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        }
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("venue", &self.adapter.venue())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), Duration::from_secs(60));
        assert!(breaker.open_for().is_none());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.open_for().is_none());
        breaker.record_failure();
        let remaining = breaker.open_for().expect("breaker should be open");
        assert!(remaining <= Duration::from_secs(60));
    }

    #[test]
    fn test_breaker_resets_on_success() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60), Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.open_for().is_none());
    }

    #[test]
    fn test_backoff_delay_shape() {
        // min(2^attempts x 1s, 30s)
        let delay = |attempts: u32| {
            RECONNECT_DELAY_BASE
                .saturating_mul(1u32 << attempts.min(15))
                .min(RECONNECT_DELAY_CAP)
        };
        assert_eq!(delay(1), Duration::from_secs(2));
        assert_eq!(delay(3), Duration::from_secs(8));
        assert_eq!(delay(10), Duration::from_secs(30));
    }
}
