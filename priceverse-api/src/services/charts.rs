//! ChartsService@2.0.0

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

use priceverse_core::{Candle, CoreError, CoreResult, Pair, Resolution};
use priceverse_services::CandleRepo;

use super::prices::{parse_input, parse_rfc3339};

/// getOHLCV page-size ceiling
const MAX_OHLCV_LIMIT: usize = 1_000;

/// Default page size when the caller omits a limit
const DEFAULT_OHLCV_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct GetChartDataInput {
    pair: String,
    period: String,
    interval: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetOhlcvInput {
    pair: String,
    interval: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

pub struct ChartsService {
    candles: Arc<CandleRepo>,
}

impl ChartsService {
    pub fn new(candles: Arc<CandleRepo>) -> Self {
        Self { candles }
    }

    pub fn dispatch(&self, method: &str, input: Value) -> CoreResult<Value> {
        match method {
            "getChartData" => self.get_chart_data(input),
            "getOHLCV" => self.get_ohlcv(input),
            other => Err(CoreError::invalid_params(format!(
                "unknown ChartsService method: {other}"
            ))),
        }
    }

    fn get_chart_data(&self, input: Value) -> CoreResult<Value> {
        let input: GetChartDataInput = parse_input(input)?;
        let pair = Pair::from_str(&input.pair)?;
        let resolution = Resolution::from_str(&input.interval)?;

        let to = match &input.to {
            Some(raw) => parse_rfc3339(raw)?,
            None => Utc::now(),
        };
        let from = match input.period.as_str() {
            "24hours" => to - ChronoDuration::hours(24),
            "7days" => to - ChronoDuration::days(7),
            "30days" => to - ChronoDuration::days(30),
            "custom" => {
                let raw = input
                    .from
                    .as_deref()
                    .ok_or_else(|| CoreError::invalid_params("custom period requires from"))?;
                parse_rfc3339(raw)?
            }
            other => return Err(CoreError::invalid_period(other)),
        };
        if from >= to {
            return Err(CoreError::invalid_time_range("from must be before to"));
        }

        let candles = self.candles.in_period(resolution, pair, from, to)?;
        if candles.is_empty() {
            return Err(CoreError::chart_data_not_found(pair));
        }

        Ok(chart_payload(&candles))
    }

    fn get_ohlcv(&self, input: Value) -> CoreResult<Value> {
        let input: GetOhlcvInput = parse_input(input)?;
        let pair = Pair::from_str(&input.pair)?;
        let resolution = Resolution::from_str(&input.interval)?;

        let limit = input.limit.unwrap_or(DEFAULT_OHLCV_LIMIT);
        if limit == 0 || limit > MAX_OHLCV_LIMIT {
            return Err(CoreError::invalid_params(format!(
                "limit must be between 1 and {MAX_OHLCV_LIMIT}"
            )));
        }
        let offset = input.offset.unwrap_or(0);

        let page = self.candles.get_with_offset(resolution, pair, limit, offset)?;
        let candles: Vec<Value> = page.rows.iter().map(candle_json).collect();

        Ok(json!({
            "candles": candles,
            "pagination": {
                "total": page.total,
                "limit": limit,
                "offset": offset,
            }
        }))
    }
}

/// Column-oriented chart payload, ascending by period start
fn chart_payload(candles: &[Candle]) -> Value {
    let dates: Vec<DateTime<Utc>> = candles.iter().map(|c| c.period_start).collect();
    let closes: Vec<_> = candles.iter().map(|c| c.close).collect();
    json!({
        "dates": dates,
        "series": closes,
        "ohlcv": {
            "open": candles.iter().map(|c| c.open).collect::<Vec<_>>(),
            "high": candles.iter().map(|c| c.high).collect::<Vec<_>>(),
            "low": candles.iter().map(|c| c.low).collect::<Vec<_>>(),
            "close": closes,
            "volume": candles.iter().map(|c| c.volume).collect::<Vec<_>>(),
        }
    })
}

fn candle_json(candle: &Candle) -> Value {
    json!({
        "pair": candle.pair,
        "periodStart": candle.period_start,
        "open": candle.open,
        "high": candle.high,
        "low": candle.low,
        "close": candle.close,
        "volume": candle.volume,
        "vwap": candle.vwap,
        "tradeCount": candle.trade_count,
    })
}
