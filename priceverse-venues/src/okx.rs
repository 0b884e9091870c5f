//! OKX trade feed adapter
//!
//! Frames are keyed by `arg.channel` with a `data` array. OKX closes idle
//! sockets after 30 seconds, so the client sends a literal `ping` text frame.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use priceverse_core::{CoreResult, Pair, Trade, Venue};

use crate::adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};

const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

const PING_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize)]
struct ChannelFrame {
    arg: ChannelArg,
    data: Vec<TradeItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelArg {
    channel: String,
    #[serde(rename = "instId")]
    #[allow(dead_code)]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct TradeItem {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "tradeId")]
    trade_id: String,
    px: String,
    sz: String,
    /// Epoch milliseconds as a string
    ts: String,
}

#[derive(Debug, Deserialize)]
struct EventFrame {
    event: String,
}

pub struct OkxAdapter {
    symbols: SymbolMap,
}

impl OkxAdapter {
    pub fn new() -> Self {
        Self {
            symbols: SymbolMap::new(&[
                (Pair::BtcUsd, "BTC-USDT"),
                (Pair::EthUsd, "ETH-USDT"),
                (Pair::XmrUsd, "XMR-USDT"),
            ]),
        }
    }

    fn convert(&self, item: TradeItem) -> Option<Trade> {
        let pair = self.symbols.pair(&item.inst_id)?;
        let price = Decimal::from_str(&item.px).ok()?;
        let volume = Decimal::from_str(&item.sz).ok()?;
        let event_time_ms: i64 = item.ts.parse().ok()?;
        Some(Trade {
            venue: Venue::Okx,
            pair,
            price,
            volume,
            event_time_ms,
            venue_trade_id: item.trade_id,
        })
    }
}

impl Default for OkxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn session(&self) -> CoreResult<SessionSpec> {
        Ok(SessionSpec {
            url: OKX_WS_URL.to_string(),
            ping_interval: Some(PING_INTERVAL),
            requires_welcome: false,
        })
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        let args: Vec<serde_json::Value> = self
            .symbols
            .symbols()
            .map(|s| serde_json::json!({"channel": "trades", "instId": s}))
            .collect();
        vec![serde_json::json!({"op": "subscribe", "args": args}).to_string()]
    }

    fn parse_message(&self, frame: &str) -> VenueMessage {
        if frame == "pong" {
            return VenueMessage::Ignore;
        }
        if let Ok(channel_frame) = serde_json::from_str::<ChannelFrame>(frame) {
            if channel_frame.arg.channel == "trades" {
                let trades: Vec<Trade> = channel_frame
                    .data
                    .into_iter()
                    .filter_map(|item| self.convert(item))
                    .collect();
                return if trades.is_empty() {
                    VenueMessage::Ignore
                } else {
                    VenueMessage::Trades(trades)
                };
            }
            return VenueMessage::Ignore;
        }
        if let Ok(event) = serde_json::from_str::<EventFrame>(frame) {
            return match event.event.as_str() {
                "subscribe" => VenueMessage::Ack,
                _ => VenueMessage::Ignore,
            };
        }
        VenueMessage::Ignore
    }

    fn ping_payload(&self) -> Option<String> {
        Some("ping".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trade_frame() {
        let adapter = OkxAdapter::new();
        let frame = r#"{
            "arg": {"channel": "trades", "instId": "BTC-USDT"},
            "data": [
                {"instId": "BTC-USDT", "tradeId": "130639474", "px": "42219.9",
                 "sz": "0.12060306", "side": "buy", "ts": "1629386781174"}
            ]
        }"#;
        match adapter.parse_message(frame) {
            VenueMessage::Trades(trades) => {
                assert_eq!(trades[0].pair, Pair::BtcUsd);
                assert_eq!(trades[0].price, dec!(42219.9));
                assert_eq!(trades[0].volume, dec!(0.12060306));
                assert_eq!(trades[0].event_time_ms, 1629386781174);
            }
            other => panic!("expected trades, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_ack() {
        let adapter = OkxAdapter::new();
        let frame = r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"}}"#;
        assert_eq!(adapter.parse_message(frame), VenueMessage::Ack);
    }

    #[test]
    fn test_text_pong_ignored() {
        let adapter = OkxAdapter::new();
        assert_eq!(adapter.parse_message("pong"), VenueMessage::Ignore);
    }

    #[test]
    fn test_literal_ping_payload() {
        let adapter = OkxAdapter::new();
        assert_eq!(adapter.ping_payload(), Some("ping".to_string()));
    }
}
