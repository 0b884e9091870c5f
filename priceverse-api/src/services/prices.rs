//! PricesService@2.0.0

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use priceverse_core::{CoreError, CoreResult, Pair, PriceSnapshot};
use priceverse_services::{PriceBus, PriceHistoryRepo};

/// Price-change window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePeriod {
    Day,
    Week,
    Month,
    Custom,
}

impl FromStr for ChangePeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24hours" => Ok(ChangePeriod::Day),
            "7days" => Ok(ChangePeriod::Week),
            "30days" => Ok(ChangePeriod::Month),
            "custom" => Ok(ChangePeriod::Custom),
            other => Err(CoreError::invalid_period(other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetPriceInput {
    pair: String,
}

#[derive(Debug, Deserialize)]
struct GetMultipleInput {
    pairs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GetChangeInput {
    pair: String,
    period: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

pub struct PricesService {
    prices: Arc<PriceHistoryRepo>,
    bus: Arc<dyn PriceBus>,
    /// Cached prices older than this are treated as a miss
    stale_after: Duration,
}

impl PricesService {
    pub fn new(
        prices: Arc<PriceHistoryRepo>,
        bus: Arc<dyn PriceBus>,
        stale_after: Duration,
    ) -> Self {
        Self {
            prices,
            bus,
            stale_after,
        }
    }

    pub async fn dispatch(&self, method: &str, input: Value) -> CoreResult<Value> {
        match method {
            "getPrice" => self.get_price(input).await,
            "getMultiplePrices" => self.get_multiple_prices(input).await,
            "getPriceChange" => self.get_price_change(input),
            "streamPrices" => Err(CoreError::invalid_params(
                "streamPrices is only available on the streaming endpoint",
            )),
            other => Err(CoreError::invalid_params(format!(
                "unknown PricesService method: {other}"
            ))),
        }
    }

    /// Fresh cache first, then the latest durable row
    async fn resolve_price(&self, pair: Pair) -> CoreResult<Option<PriceSnapshot>> {
        match self.bus.cached_price(pair, self.stale_after).await {
            Ok(Some(snapshot)) => return Ok(Some(snapshot)),
            Ok(None) => {}
            // Cache trouble is not an API error; fall through to the store
            Err(e) => tracing::warn!("[Prices] cache read failed for {}: {}", pair, e),
        }
        Ok(self.prices.latest(pair)?.as_ref().map(PriceSnapshot::from))
    }

    async fn get_price(&self, input: Value) -> CoreResult<Value> {
        let input: GetPriceInput = parse_input(input)?;
        let pair = Pair::from_str(&input.pair)?;
        let snapshot = self
            .resolve_price(pair)
            .await?
            .ok_or_else(|| CoreError::price_unavailable(pair))?;
        Ok(snapshot_json(&snapshot))
    }

    async fn get_multiple_prices(&self, input: Value) -> CoreResult<Value> {
        let input: GetMultipleInput = parse_input(input)?;
        if input.pairs.is_empty() || input.pairs.len() > 10 {
            return Err(CoreError::invalid_params(
                "pairs must contain between 1 and 10 entries",
            ));
        }
        let mut pairs = Vec::with_capacity(input.pairs.len());
        for raw in &input.pairs {
            pairs.push(Pair::from_str(raw)?);
        }

        // Pairs without any price are silently dropped
        let mut snapshots = Vec::new();
        for pair in pairs {
            if let Some(snapshot) = self.resolve_price(pair).await? {
                snapshots.push(snapshot_json(&snapshot));
            }
        }
        Ok(Value::Array(snapshots))
    }

    fn get_price_change(&self, input: Value) -> CoreResult<Value> {
        let input: GetChangeInput = parse_input(input)?;
        let pair = Pair::from_str(&input.pair)?;
        let period = ChangePeriod::from_str(&input.period)?;

        let to = match &input.to {
            Some(raw) => parse_rfc3339(raw)?,
            None => Utc::now(),
        };
        let from = match period {
            ChangePeriod::Day => to - ChronoDuration::hours(24),
            ChangePeriod::Week => to - ChronoDuration::days(7),
            ChangePeriod::Month => to - ChronoDuration::days(30),
            ChangePeriod::Custom => {
                let raw = input
                    .from
                    .as_deref()
                    .ok_or_else(|| CoreError::invalid_params("custom period requires from"))?;
                parse_rfc3339(raw)?
            }
        };
        if from >= to {
            return Err(CoreError::invalid_time_range("from must be before to"));
        }

        let start = self
            .prices
            .first_after(pair, from.timestamp_millis())?
            .ok_or_else(|| CoreError::price_unavailable(pair))?;
        let end = self
            .prices
            .last_before(pair, to.timestamp_millis())?
            .ok_or_else(|| CoreError::price_unavailable(pair))?;

        let change_percent = if start.price > Decimal::ZERO {
            (end.price - start.price) / start.price * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        Ok(json!({
            "pair": pair,
            "startDate": from,
            "endDate": to,
            "startPrice": start.price,
            "endPrice": end.price,
            "changePercent": change_percent,
        }))
    }
}

pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> CoreResult<T> {
    serde_json::from_value(input).map_err(|e| CoreError::invalid_params(format!("bad input: {e}")))
}

pub(crate) fn parse_rfc3339(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CoreError::invalid_date(format!("not an RFC3339 timestamp: {raw}")))
}

fn snapshot_json(snapshot: &PriceSnapshot) -> Value {
    json!({
        "pair": snapshot.pair,
        "price": snapshot.price,
        "timestamp": snapshot.timestamp,
    })
}
