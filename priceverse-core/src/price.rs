//! Canonical prices and the fiat rate
//!
//! A canonical price is the volume-weighted aggregate emitted once per tick
//! per pair. Its event time is the aggregator's wall clock at emission, which
//! keeps the per-pair series monotone even when venue trades arrive late.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pair::Pair;

/// Aggregation method recorded on every canonical price row
pub const VWAP_METHOD: &str = "vwap";

/// A canonical aggregated price, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub pair: Pair,
    pub price: Decimal,
    /// Aggregator wall clock at emission, epoch milliseconds
    pub event_time_ms: i64,
    pub method: String,
    /// Distinct contributing sources (venue names, plus "cbr" on derived rows)
    pub sources: Vec<String>,
    /// Total volume over the aggregation window
    pub volume: Decimal,
}

impl PricePoint {
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.event_time_ms)
    }
}

/// The compact price payload cached, published, and served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub pair: Pair,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl From<&PricePoint> for PriceSnapshot {
    fn from(point: &PricePoint) -> Self {
        Self {
            pair: point.pair,
            price: point.price,
            timestamp: point.event_time().unwrap_or_else(Utc::now),
        }
    }
}

/// Freshness of the USD→RUB rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateStatus {
    /// Fetched within the cache TTL
    Fresh,
    /// Last fetch is older than 2x the cache TTL
    Stale,
    /// The source has never succeeded in this process
    Fallback,
}

/// The latest known fiat rate with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiatRate {
    pub rate: Decimal,
    pub status: RateStatus,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl FiatRate {
    /// Whether derived-pair emission may use this rate
    pub fn is_usable(&self) -> bool {
        self.rate > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_from_point() {
        let point = PricePoint {
            pair: Pair::BtcUsd,
            price: dec!(45000),
            event_time_ms: 1_700_000_000_000,
            method: VWAP_METHOD.to_string(),
            sources: vec!["binance".into()],
            volume: dec!(1),
        };
        let snap = PriceSnapshot::from(&point);
        assert_eq!(snap.pair, Pair::BtcUsd);
        assert_eq!(snap.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_fallback_rate_usable_when_positive() {
        let rate = FiatRate {
            rate: dec!(90),
            status: RateStatus::Fallback,
            fetched_at: None,
        };
        assert!(rate.is_usable());

        let zero = FiatRate {
            rate: Decimal::ZERO,
            status: RateStatus::Fresh,
            fetched_at: Some(Utc::now()),
        };
        assert!(!zero.is_usable());
    }
}
