//! Central Bank fiat-rate source
//!
//! Single writer (the refresh task), many readers. `get_rate()` never blocks
//! on the network: it reads the cached value and reports freshness. The rate
//! is stale once the last fetch is older than twice the cache TTL, and
//! fallback (configured, default 90.0) when no fetch has ever succeeded.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use priceverse_core::{
    CbrConfig, CheckResult, ComponentHealth, CoreError, CoreResult, FiatRate, RateStatus,
};

/// Read seam handed to the aggregator; test doubles supply fixed rates
pub trait RateSource: Send + Sync {
    fn get_rate(&self) -> FiatRate;
}

/// Daily-rates document: `{"Valute": {"USD": {"Value": 92.5, ...}, ...}}`
#[derive(Debug, Deserialize)]
struct DailyRates {
    #[serde(rename = "Valute")]
    valute: HashMap<String, ValuteEntry>,
}

#[derive(Debug, Deserialize)]
struct ValuteEntry {
    #[serde(rename = "Value")]
    value: f64,
}

#[derive(Debug, Default)]
struct RateState {
    rate: Option<Decimal>,
    fetched_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

pub struct CbrRateSource {
    config: CbrConfig,
    http: reqwest::Client,
    state: Arc<RwLock<RateState>>,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CbrRateSource {
    pub fn new(config: CbrConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            http,
            state: Arc::new(RwLock::new(RateState::default())),
            shutdown_tx,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    fn fallback_rate(&self) -> Decimal {
        Decimal::try_from(self.config.fallback_rate).unwrap_or(Decimal::from(90))
    }

    /// One fetch attempt against the configured endpoint
    async fn fetch_once(
        http: &reqwest::Client,
        url: &str,
    ) -> CoreResult<Decimal> {
        let response = http
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::internal(format!("cbr request: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::internal(format!(
                "cbr returned {}",
                response.status()
            )));
        }
        let rates: DailyRates = response
            .json()
            .await
            .map_err(|e| CoreError::internal(format!("cbr parse: {e}")))?;
        let usd = rates
            .valute
            .get("USD")
            .ok_or_else(|| CoreError::internal("cbr document missing USD"))?;
        Decimal::try_from(usd.value)
            .map_err(|e| CoreError::internal(format!("cbr rate value: {e}")))
            .and_then(|rate| {
                if rate > Decimal::ZERO {
                    Ok(rate)
                } else {
                    Err(CoreError::internal("cbr rate not positive"))
                }
            })
    }

    /// Fetch with the configured retry schedule, updating shared state
    pub async fn refresh(&self) -> CoreResult<Decimal> {
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last_err = CoreError::internal("no fetch attempted");
        for attempt in 0..self.config.retry_attempts.max(1) {
            match Self::fetch_once(&self.http, &self.config.url).await {
                Ok(rate) => {
                    let mut state = self.state.write();
                    state.rate = Some(rate);
                    state.fetched_at = Some(Utc::now());
                    state.consecutive_failures = 0;
                    info!("[CBR] USD rate refreshed: {}", rate);
                    return Ok(rate);
                }
                Err(e) => {
                    warn!(
                        "[CBR] fetch attempt {}/{} failed: {}",
                        attempt + 1,
                        self.config.retry_attempts,
                        e
                    );
                    last_err = e;
                    if attempt + 1 < self.config.retry_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        self.state.write().consecutive_failures += 1;
        Err(last_err)
    }

    /// Spawn the periodic refresh task (one immediate fetch, then every TTL)
    pub async fn start(self: Arc<Self>) {
        self.shutdown_tx.send_replace(false);
        let source = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let ttl = Duration::from_secs(self.config.cache_ttl_secs.max(1));

        let mut handle = self.handle.lock().await;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = source.refresh().await {
                            warn!("[CBR] refresh failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.handle.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures
    }

    pub fn health(&self) -> ComponentHealth {
        let rate = self.get_rate();
        let mut checks = std::collections::BTreeMap::new();
        let check = match rate.status {
            RateStatus::Fresh => CheckResult::healthy(),
            RateStatus::Stale => CheckResult::degraded("rate is stale"),
            RateStatus::Fallback => {
                if self.consecutive_failures() > 0 {
                    CheckResult::unhealthy("source never succeeded, serving fallback")
                } else {
                    CheckResult::degraded("no fetch yet, serving fallback")
                }
            }
        };
        checks.insert("rate".to_string(), check);
        ComponentHealth::from_checks(checks)
    }
}

impl RateSource for CbrRateSource {
    fn get_rate(&self) -> FiatRate {
        let state = self.state.read();
        match (state.rate, state.fetched_at) {
            (Some(rate), Some(fetched_at)) => {
                let age = Utc::now().signed_duration_since(fetched_at);
                let status = if age.num_seconds() > (2 * self.config.cache_ttl_secs) as i64 {
                    RateStatus::Stale
                } else {
                    RateStatus::Fresh
                };
                FiatRate {
                    rate,
                    status,
                    fetched_at: Some(fetched_at),
                }
            }
            _ => FiatRate {
                rate: self.fallback_rate(),
                status: RateStatus::Fallback,
                fetched_at: None,
            },
        }
    }
}

/// Fixed-rate source for tests
pub struct StaticRateSource {
    pub rate: FiatRate,
}

impl StaticRateSource {
    pub fn fresh(rate: Decimal) -> Self {
        Self {
            rate: FiatRate {
                rate,
                status: RateStatus::Fresh,
                fetched_at: Some(Utc::now()),
            },
        }
    }

    pub fn fallback(rate: Decimal) -> Self {
        Self {
            rate: FiatRate {
                rate,
                status: RateStatus::Fallback,
                fetched_at: None,
            },
        }
    }
}

impl RateSource for StaticRateSource {
    fn get_rate(&self) -> FiatRate {
        self.rate.clone()
    }
}
