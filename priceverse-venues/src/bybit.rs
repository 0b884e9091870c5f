//! Bybit trade feed adapter
//!
//! Spot public stream; frames are keyed by `topic` with a `data` array.
//! Bybit expects a client-driven `{"op":"ping"}` roughly every 20 seconds.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use priceverse_core::{CoreResult, Pair, Trade, Venue};

use crate::adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};

const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

const PING_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct TopicFrame {
    topic: String,
    data: Vec<TradeItem>,
}

#[derive(Debug, Deserialize)]
struct TradeItem {
    /// Venue trade id
    i: String,
    /// Trade time, epoch ms
    #[serde(rename = "T")]
    trade_time_ms: i64,
    /// Price
    p: String,
    /// Size
    v: String,
    /// Symbol
    s: String,
}

#[derive(Debug, Deserialize)]
struct OpReply {
    op: String,
    #[serde(default)]
    success: Option<bool>,
}

pub struct BybitAdapter {
    symbols: SymbolMap,
}

impl BybitAdapter {
    pub fn new() -> Self {
        Self {
            symbols: SymbolMap::new(&[
                (Pair::BtcUsd, "BTCUSDT"),
                (Pair::EthUsd, "ETHUSDT"),
                (Pair::XmrUsd, "XMRUSDT"),
            ]),
        }
    }

    fn convert(&self, item: TradeItem) -> Option<Trade> {
        let pair = self.symbols.pair(&item.s)?;
        let price = Decimal::from_str(&item.p).ok()?;
        let volume = Decimal::from_str(&item.v).ok()?;
        Some(Trade {
            venue: Venue::Bybit,
            pair,
            price,
            volume,
            event_time_ms: item.trade_time_ms,
            venue_trade_id: item.i,
        })
    }
}

impl Default for BybitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn session(&self) -> CoreResult<SessionSpec> {
        Ok(SessionSpec {
            url: BYBIT_WS_URL.to_string(),
            ping_interval: Some(PING_INTERVAL),
            requires_welcome: false,
        })
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        let args: Vec<String> = self
            .symbols
            .symbols()
            .map(|s| format!("publicTrade.{s}"))
            .collect();
        vec![serde_json::json!({"op": "subscribe", "args": args}).to_string()]
    }

    fn parse_message(&self, frame: &str) -> VenueMessage {
        if let Ok(topic_frame) = serde_json::from_str::<TopicFrame>(frame) {
            if topic_frame.topic.starts_with("publicTrade.") {
                let trades: Vec<Trade> = topic_frame
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
        if let Ok(reply) = serde_json::from_str::<OpReply>(frame) {
            return match (reply.op.as_str(), reply.success) {
                ("subscribe", Some(true)) => VenueMessage::Ack,
                _ => VenueMessage::Ignore,
            };
        }
        VenueMessage::Ignore
    }

    fn ping_payload(&self) -> Option<String> {
        Some(serde_json::json!({"op": "ping"}).to_string())
    }
}
