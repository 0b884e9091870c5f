//! OHLCV candles and resolutions

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, ErrorCode};
use crate::pair::Pair;

/// Candle resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "5min")]
    FiveMin,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "1day")]
    OneDay,
}

impl Resolution {
    pub fn all() -> &'static [Resolution] {
        &[Resolution::FiveMin, Resolution::OneHour, Resolution::OneDay]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FiveMin => "5min",
            Resolution::OneHour => "1hour",
            Resolution::OneDay => "1day",
        }
    }

    pub fn period_secs(&self) -> i64 {
        match self {
            Resolution::FiveMin => 300,
            Resolution::OneHour => 3600,
            Resolution::OneDay => 86400,
        }
    }

    /// Floor a timestamp to the start of its period (UTC)
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Resolution::FiveMin | Resolution::OneHour => {
                let secs = ts.timestamp() - ts.timestamp().rem_euclid(self.period_secs());
                Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
            }
            Resolution::OneDay => Utc
                .with_ymd_and_hms(ts.year(), ts.month(), ts.day(), 0, 0, 0)
                .single()
                .unwrap_or(ts),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5min" => Ok(Resolution::FiveMin),
            "1hour" => Ok(Resolution::OneHour),
            "1day" => Ok(Resolution::OneDay),
            other => Err(CoreError::new(
                ErrorCode::InvalidInterval,
                format!("unknown interval: {other}"),
            )),
        }
    }
}

/// An OHLCV candle, upserted by `(pair, period_start)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: Pair,
    pub period_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<Decimal>,
    pub trade_count: u64,
}

impl Candle {
    /// Check the structural candle invariants
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        let vwap_ok = self
            .vwap
            .map(|v| v >= self.low && v <= self.high)
            .unwrap_or(true);
        self.low <= body_low
            && body_high <= self.high
            && self.volume >= Decimal::ZERO
            && self.trade_count > 0
            && vwap_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_five_min() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 42).unwrap();
        let floored = Resolution::FiveMin.floor(ts);
        assert_eq!(floored, Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn test_floor_hour_and_day() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 59, 59).unwrap();
        assert_eq!(
            Resolution::OneHour.floor(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            Resolution::OneDay.floor(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_well_formed() {
        let candle = Candle {
            pair: Pair::BtcUsd,
            period_start: Utc::now(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(4),
            vwap: Some(dec!(103)),
            trade_count: 3,
        };
        assert!(candle.is_well_formed());

        let broken = Candle {
            high: dec!(99),
            ..candle
        };
        assert!(!broken.is_well_formed());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("5min".parse::<Resolution>().unwrap(), Resolution::FiveMin);
        let err = "2hour".parse::<Resolution>().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInterval);
    }
}
