//! Kraken trade feed adapter
//!
//! Kraken emits trades as positional array frames rather than objects:
//! `[channel_id, [[price, volume, time, ...], ...], "trade", "XBT/USD"]`
//! with the pair name at position 3 and the trade list at position 1. Only
//! the most recent entry of the list is taken.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use priceverse_core::{CoreResult, Pair, Trade, Venue};

use crate::adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};

const KRAKEN_WS_URL: &str = "wss://ws.kraken.com";

pub struct KrakenAdapter {
    symbols: SymbolMap,
}

impl KrakenAdapter {
    pub fn new() -> Self {
        Self {
            symbols: SymbolMap::new(&[
                (Pair::BtcUsd, "XBT/USD"),
                (Pair::EthUsd, "ETH/USD"),
                (Pair::XmrUsd, "XMR/USD"),
            ]),
        }
    }

    /// Convert one positional trade entry `[price, volume, time, side, ord, misc]`
    fn convert(&self, pair: Pair, entry: &Value) -> Option<Trade> {
        let fields = entry.as_array()?;
        let price = Decimal::from_str(fields.first()?.as_str()?).ok()?;
        let volume = Decimal::from_str(fields.get(1)?.as_str()?).ok()?;
        let time_secs: f64 = fields.get(2)?.as_str()?.parse().ok()?;
        let event_time_ms = (time_secs * 1000.0) as i64;
        Some(Trade {
            venue: Venue::Kraken,
            pair,
            price,
            volume,
            event_time_ms,
            venue_trade_id: format!("{}-{}", pair.as_str(), fields.get(2)?.as_str()?),
        })
    }
}

impl Default for KrakenAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for KrakenAdapter {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn session(&self) -> CoreResult<SessionSpec> {
        Ok(SessionSpec::direct(KRAKEN_WS_URL))
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        let pairs: Vec<&str> = self.symbols.symbols().collect();
        vec![serde_json::json!({
            "event": "subscribe",
            "pair": pairs,
            "subscription": {"name": "trade"}
        })
        .to_string()]
    }

    fn parse_message(&self, frame: &str) -> VenueMessage {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(_) => return VenueMessage::Ignore,
        };

        // Object frames are lifecycle events
        if let Some(obj) = value.as_object() {
            return match obj.get("event").and_then(|e| e.as_str()) {
                Some("subscriptionStatus")
                    if obj.get("status").and_then(|s| s.as_str()) == Some("subscribed") =>
                {
                    VenueMessage::Ack
                }
                _ => VenueMessage::Ignore,
            };
        }

        // Positional trade frame
        let parts = match value.as_array() {
            Some(parts) if parts.len() >= 4 => parts,
            _ => return VenueMessage::Ignore,
        };
        if parts.get(2).and_then(|v| v.as_str()) != Some("trade") {
            return VenueMessage::Ignore;
        }
        let pair = match parts
            .get(3)
            .and_then(|v| v.as_str())
            .and_then(|sym| self.symbols.pair(sym))
        {
            Some(pair) => pair,
            None => return VenueMessage::Ignore,
        };
        let entries = match parts.get(1).and_then(|v| v.as_array()) {
            Some(entries) if !entries.is_empty() => entries,
            _ => return VenueMessage::Ignore,
        };

        // Most recent entry only
        match entries.last().and_then(|entry| self.convert(pair, entry)) {
            Some(trade) => VenueMessage::Trades(vec![trade]),
            None => VenueMessage::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_positional_frame_takes_last() {
        let adapter = KrakenAdapter::new();
        let frame = r#"[
            337,
            [
                ["5541.20000", "0.15850568", "1534614057.321597", "s", "l", ""],
                ["5541.30000", "0.08000000", "1534614057.324998", "b", "l", ""]
            ],
            "trade",
            "XBT/USD"
        ]"#;
        match adapter.parse_message(frame) {
            VenueMessage::Trades(trades) => {
                assert_eq!(trades.len(), 1);
                assert_eq!(trades[0].pair, Pair::BtcUsd);
                assert_eq!(trades[0].price, dec!(5541.30000));
                assert_eq!(trades[0].volume, dec!(0.08000000));
                assert_eq!(trades[0].event_time_ms, 1534614057324);
            }
            other => panic!("expected trades, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_ignored() {
        let adapter = KrakenAdapter::new();
        assert_eq!(
            adapter.parse_message(r#"{"event":"heartbeat"}"#),
            VenueMessage::Ignore
        );
    }

    #[test]
    fn test_subscription_status_ack() {
        let adapter = KrakenAdapter::new();
        let frame = r#"{
            "channelID": 337, "channelName": "trade", "event": "subscriptionStatus",
            "pair": "XBT/USD", "status": "subscribed", "subscription": {"name": "trade"}
        }"#;
        assert_eq!(adapter.parse_message(frame), VenueMessage::Ack);
    }

    #[test]
    fn test_non_trade_channel_ignored() {
        let adapter = KrakenAdapter::new();
        let frame = r#"[42, {"a": ["5525.40000", 1, "1.000"]}, "spread", "XBT/USD"]"#;
        assert_eq!(adapter.parse_message(frame), VenueMessage::Ignore);
    }
}
