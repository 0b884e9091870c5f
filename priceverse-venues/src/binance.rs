//! Binance trade feed adapter
//!
//! Uses the combined-stream endpoint; the URL itself carries the stream
//! subscriptions, so no subscribe payload is sent after connect.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use priceverse_core::{CoreResult, Pair, Trade, Venue};

use crate::adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};

const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream";

/// Combined-stream wrapper frame
#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[allow(dead_code)]
    stream: String,
    data: TradeEvent,
}

/// Trade event payload, keyed by `e == "trade"`
#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

pub struct BinanceAdapter {
    symbols: SymbolMap,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self {
            symbols: SymbolMap::new(&[
                (Pair::BtcUsd, "BTCUSDT"),
                (Pair::EthUsd, "ETHUSDT"),
                (Pair::XmrUsd, "XMRUSDT"),
            ]),
        }
    }

    fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .symbols
            .symbols()
            .map(|s| format!("{}@trade", s.to_lowercase()))
            .collect();
        format!("{}?streams={}", BINANCE_WS_URL, streams.join("/"))
    }

    fn convert(&self, event: TradeEvent) -> Option<Trade> {
        if event.event != "trade" {
            return None;
        }
        let pair = self.symbols.pair(&event.symbol)?;
        let price = Decimal::from_str(&event.price).ok()?;
        let volume = Decimal::from_str(&event.quantity).ok()?;
        Some(Trade {
            venue: Venue::Binance,
            pair,
            price,
            volume,
            event_time_ms: event.trade_time_ms,
            venue_trade_id: event.trade_id.to_string(),
        })
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn session(&self) -> CoreResult<SessionSpec> {
        Ok(SessionSpec::direct(self.stream_url()))
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        Vec::new()
    }

    fn parse_message(&self, frame: &str) -> VenueMessage {
        // Combined-stream wrapper first, bare event as fallback
        if let Ok(wrapped) = serde_json::from_str::<StreamFrame>(frame) {
            return match self.convert(wrapped.data) {
                Some(trade) => VenueMessage::Trades(vec![trade]),
                None => VenueMessage::Ignore,
            };
        }
        if let Ok(event) = serde_json::from_str::<TradeEvent>(frame) {
            return match self.convert(event) {
                Some(trade) => VenueMessage::Trades(vec![trade]),
                None => VenueMessage::Ignore,
            };
        }
        VenueMessage::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_combined_frame() {
        let adapter = BinanceAdapter::new();
        let frame = r#"{
            "stream": "btcusdt@trade",
            "data": {
                "e": "trade", "E": 1672515782136, "s": "BTCUSDT",
                "t": 12345, "p": "16569.01", "q": "0.014", "T": 1672515782134,
                "m": true, "M": true
            }
        }"#;
        match adapter.parse_message(frame) {
            VenueMessage::Trades(trades) => {
                assert_eq!(trades.len(), 1);
                let trade = &trades[0];
                assert_eq!(trade.pair, Pair::BtcUsd);
                assert_eq!(trade.price, dec!(16569.01));
                assert_eq!(trade.volume, dec!(0.014));
                assert_eq!(trade.event_time_ms, 1672515782134);
                assert_eq!(trade.venue_trade_id, "12345");
            }
            other => panic!("expected trades, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_symbol_dropped() {
        let adapter = BinanceAdapter::new();
        let frame = r#"{"e":"trade","s":"DOGEUSDT","t":1,"p":"0.1","q":"1","T":1}"#;
        assert_eq!(adapter.parse_message(frame), VenueMessage::Ignore);
    }

    #[test]
    fn test_garbage_ignored() {
        let adapter = BinanceAdapter::new();
        assert_eq!(adapter.parse_message("not json"), VenueMessage::Ignore);
    }

    #[test]
    fn test_stream_url_carries_all_symbols() {
        let adapter = BinanceAdapter::new();
        let url = adapter.stream_url();
        assert!(url.contains("btcusdt@trade"));
        assert!(url.contains("ethusdt@trade"));
        assert!(url.contains("xmrusdt@trade"));
    }
}
