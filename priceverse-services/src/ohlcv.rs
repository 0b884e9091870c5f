//! OHLCV roll-up
//!
//! On wall-clock boundaries, folds the canonical price history into one
//! candle per pair per resolution and upserts it. The computation is a pure
//! function of the period's rows, so recomputing a period is idempotent and
//! intentional recomputes are last-writer-wins.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use priceverse_core::{Candle, CoreResult, Pair, PricePoint, Resolution};

use crate::repo::{CandleRepo, PriceHistoryRepo, SortOrder};

/// Pagination cap on the per-period price load
const MAX_ROWS_PER_PERIOD: usize = 10_000;

/// Per-resolution run bookkeeping for health
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntervalStats {
    pub last_run: Option<DateTime<Utc>>,
    pub processed_count: u64,
}

pub struct OhlcvAggregator {
    prices: Arc<PriceHistoryRepo>,
    candles: Arc<CandleRepo>,
    pairs: Vec<Pair>,
    stats: Mutex<HashMap<Resolution, IntervalStats>>,
}

impl OhlcvAggregator {
    pub fn new(prices: Arc<PriceHistoryRepo>, candles: Arc<CandleRepo>) -> Self {
        Self {
            prices,
            candles,
            pairs: Pair::all().to_vec(),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// The just-closed period for a resolution relative to `now`
    pub fn closed_period(
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = resolution.floor(now);
        let start = end - ChronoDuration::seconds(resolution.period_secs());
        (start, end)
    }

    /// Aggregate the just-closed period of a resolution across all pairs.
    /// Per-pair failures are logged and do not skip the remaining pairs.
    pub async fn run_resolution(&self, resolution: Resolution, now: DateTime<Utc>) -> usize {
        let (start, end) = Self::closed_period(resolution, now);
        let mut processed = 0;

        for pair in &self.pairs {
            match self.aggregate_pair(resolution, *pair, start, end) {
                Ok(Some(candle)) => {
                    debug!(
                        "[OHLCV] {} {} {}: o={} h={} l={} c={} n={}",
                        resolution, pair, start, candle.open, candle.high, candle.low,
                        candle.close, candle.trade_count
                    );
                    processed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("[OHLCV] {} aggregation failed for {}: {}", resolution, pair, e);
                }
            }
        }

        let mut stats = self.stats.lock();
        let entry = stats.entry(resolution).or_default();
        entry.last_run = Some(Utc::now());
        entry.processed_count += processed as u64;

        info!(
            "[OHLCV] {} run for {}..{}: {} candles",
            resolution, start, end, processed
        );
        processed
    }

    /// Compute and upsert one pair's candle for `[start, end)`. Returns
    /// `None` when the period holds no rows.
    pub fn aggregate_pair(
        &self,
        resolution: Resolution,
        pair: Pair,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Option<Candle>> {
        let rows = self.prices.in_range(
            pair,
            start.timestamp_millis(),
            end.timestamp_millis(),
            Some(MAX_ROWS_PER_PERIOD),
            0,
            SortOrder::Asc,
        )?;

        let Some(candle) = build_candle(pair, start, &rows) else {
            return Ok(None);
        };

        self.candles.upsert(resolution, &candle)?;
        Ok(Some(candle))
    }

    pub fn stats(&self) -> HashMap<Resolution, IntervalStats> {
        self.stats.lock().clone()
    }
}

/// Fold ascending canonical prices into a candle. Empty input yields none;
/// zero total volume falls back to the open/close midpoint for the vwap so
/// the candle stays usable when volume went unrecorded.
pub fn build_candle(pair: Pair, period_start: DateTime<Utc>, rows: &[PricePoint]) -> Option<Candle> {
    let first = rows.first()?;
    let last = rows.last()?;

    let mut high = first.price;
    let mut low = first.price;
    let mut volume = Decimal::ZERO;
    let mut weighted = Decimal::ZERO;

    for row in rows {
        high = high.max(row.price);
        low = low.min(row.price);
        volume += row.volume;
        weighted += row.price * row.volume;
    }

    let vwap = if volume > Decimal::ZERO {
        weighted / volume
    } else {
        (first.price + last.price) / Decimal::from(2)
    };

    Some(Candle {
        pair,
        period_start,
        open: first.price,
        high,
        low,
        close: last.price,
        volume,
        vwap: Some(vwap),
        trade_count: rows.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::Database;
    use chrono::TimeZone;
    use priceverse_core::VWAP_METHOD;
    use rust_decimal_macros::dec;

    fn point(pair: Pair, price: Decimal, volume: Decimal, t: DateTime<Utc>) -> PricePoint {
        PricePoint {
            pair,
            price,
            event_time_ms: t.timestamp_millis(),
            method: VWAP_METHOD.to_string(),
            sources: vec!["binance".into()],
            volume,
        }
    }

    fn setup() -> (OhlcvAggregator, Arc<PriceHistoryRepo>, Arc<CandleRepo>) {
        let db = Database::open_in_memory().unwrap();
        let prices = Arc::new(PriceHistoryRepo::new(db.clone()));
        let candles = Arc::new(CandleRepo::new(db));
        let aggregator = OhlcvAggregator::new(prices.clone(), candles.clone());
        (aggregator, prices, candles)
    }

    #[test]
    fn test_candle_math() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let rows = vec![
            point(Pair::BtcUsd, dec!(100), dec!(1), t0),
            point(Pair::BtcUsd, dec!(110), dec!(2), t0 + ChronoDuration::seconds(60)),
            point(Pair::BtcUsd, dec!(105), dec!(1), t0 + ChronoDuration::seconds(120)),
        ];
        let candle = build_candle(Pair::BtcUsd, t0, &rows).unwrap();
        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.high, dec!(110));
        assert_eq!(candle.low, dec!(100));
        assert_eq!(candle.close, dec!(105));
        assert_eq!(candle.volume, dec!(4));
        assert_eq!(candle.vwap, Some(dec!(106.25)));
        assert_eq!(candle.trade_count, 3);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_zero_volume_vwap_falls_back_to_midpoint() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let rows = vec![
            point(Pair::BtcUsd, dec!(100), dec!(0), t0),
            point(Pair::BtcUsd, dec!(110), dec!(0), t0 + ChronoDuration::seconds(60)),
        ];
        let candle = build_candle(Pair::BtcUsd, t0, &rows).unwrap();
        assert_eq!(candle.vwap, Some(dec!(105)));
        assert_eq!(candle.volume, dec!(0));
    }

    #[test]
    fn test_empty_period_skipped() {
        assert!(build_candle(Pair::BtcUsd, Utc::now(), &[]).is_none());
    }

    #[test]
    fn test_closed_period_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 7, 3).unwrap();
        let (start, end) = OhlcvAggregator::closed_period(Resolution::FiveMin, now);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 15, 12, 5, 0).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap());

        let (start, end) = OhlcvAggregator::closed_period(Resolution::OneDay, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 14, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_run_resolution_upserts_and_is_idempotent() {
        let (aggregator, prices, candles) = setup();
        let period = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        for (i, price) in [dec!(100), dec!(110), dec!(105)].iter().enumerate() {
            prices
                .insert(&point(
                    Pair::BtcUsd,
                    *price,
                    dec!(1),
                    period + ChronoDuration::seconds(i as i64 * 60),
                ))
                .unwrap();
        }

        let now = period + ChronoDuration::seconds(300);
        let processed = aggregator.run_resolution(Resolution::FiveMin, now).await;
        assert_eq!(processed, 1);

        let first = candles
            .latest(Resolution::FiveMin, Pair::BtcUsd)
            .unwrap()
            .unwrap();

        // Re-running the same period yields the same candle, still one row
        aggregator.run_resolution(Resolution::FiveMin, now).await;
        let second = candles
            .latest(Resolution::FiveMin, Pair::BtcUsd)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(candles.count(Resolution::FiveMin, Pair::BtcUsd).unwrap(), 1);

        let stats = aggregator.stats();
        let interval = stats.get(&Resolution::FiveMin).unwrap();
        assert!(interval.last_run.is_some());
        assert_eq!(interval.processed_count, 2);
    }

    #[tokio::test]
    async fn test_pair_failures_isolated() {
        let (aggregator, prices, _) = setup();
        let period = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        // Only one pair has data; the rest are skipped, none abort the run
        prices
            .insert(&point(Pair::EthUsd, dec!(3000), dec!(1), period))
            .unwrap();
        let processed = aggregator
            .run_resolution(Resolution::FiveMin, period + ChronoDuration::seconds(300))
            .await;
        assert_eq!(processed, 1);
    }
}
