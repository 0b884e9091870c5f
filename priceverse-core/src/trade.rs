//! Normalized trade records
//!
//! A trade is ephemeral: produced by a collector, carried through the venue
//! event log as flat string fields, consumed once by the aggregator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::pair::{Pair, Venue};

/// A normalized trade from a venue feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub venue: Venue,
    pub pair: Pair,
    pub price: Decimal,
    pub volume: Decimal,
    /// Venue-reported event time, epoch milliseconds
    pub event_time_ms: i64,
    pub venue_trade_id: String,
}

impl Trade {
    /// Flatten to the field list appended to the venue event log
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("pair".into(), self.pair.as_str().into()),
            ("price".into(), self.price.to_string()),
            ("volume".into(), self.volume.to_string()),
            ("event_time".into(), self.event_time_ms.to_string()),
            ("trade_id".into(), self.venue_trade_id.clone()),
        ]
    }

    /// Rebuild from venue log fields. Unknown extra fields are ignored;
    /// missing or malformed required fields reject the entry.
    pub fn from_fields(venue: Venue, fields: &[(String, String)]) -> CoreResult<Self> {
        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .ok_or_else(|| CoreError::invalid_params(format!("missing field: {key}")))
        };

        let pair = Pair::from_str(get("pair")?)?;
        let price = Decimal::from_str(get("price")?)
            .map_err(|e| CoreError::invalid_params(format!("bad price: {e}")))?;
        let volume = Decimal::from_str(get("volume")?)
            .map_err(|e| CoreError::invalid_params(format!("bad volume: {e}")))?;
        let event_time_ms: i64 = get("event_time")?
            .parse()
            .map_err(|e| CoreError::invalid_params(format!("bad event_time: {e}")))?;
        let venue_trade_id = get("trade_id")?.to_string();

        if price <= Decimal::ZERO {
            return Err(CoreError::invalid_params("price must be positive"));
        }
        if volume < Decimal::ZERO {
            return Err(CoreError::invalid_params("volume must be non-negative"));
        }

        Ok(Self {
            venue,
            pair,
            price,
            volume,
            event_time_ms,
            venue_trade_id,
        })
    }
}
