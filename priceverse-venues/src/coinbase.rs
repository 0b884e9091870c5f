//! Coinbase trade feed adapter
//!
//! Subscribes to the `matches` channel and accepts only `type == "match"`
//! frames. Coinbase does not list xmr-usd; its absence from the symbol map
//! is intentional, not an error.

use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use priceverse_core::{CoreResult, Pair, Trade, Venue};

use crate::adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};

const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

#[derive(Debug, Deserialize)]
struct TypedFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    trade_id: Option<u64>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

pub struct CoinbaseAdapter {
    symbols: SymbolMap,
}

impl CoinbaseAdapter {
    pub fn new() -> Self {
        Self {
            symbols: SymbolMap::new(&[
                (Pair::BtcUsd, "BTC-USD"),
                (Pair::EthUsd, "ETH-USD"),
            ]),
        }
    }

    fn convert(&self, frame: TypedFrame) -> Option<Trade> {
        let pair = self.symbols.pair(frame.product_id.as_deref()?)?;
        let price = Decimal::from_str(frame.price.as_deref()?).ok()?;
        let volume = Decimal::from_str(frame.size.as_deref()?).ok()?;
        let event_time_ms = DateTime::parse_from_rfc3339(frame.time.as_deref()?)
            .ok()?
            .timestamp_millis();
        Some(Trade {
            venue: Venue::Coinbase,
            pair,
            price,
            volume,
            event_time_ms,
            venue_trade_id: frame.trade_id?.to_string(),
        })
    }
}

impl Default for CoinbaseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for CoinbaseAdapter {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn session(&self) -> CoreResult<SessionSpec> {
        Ok(SessionSpec::direct(COINBASE_WS_URL))
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        let product_ids: Vec<&str> = self.symbols.symbols().collect();
        vec![serde_json::json!({
            "type": "subscribe",
            "product_ids": product_ids,
            "channels": ["matches"]
        })
        .to_string()]
    }

    fn parse_message(&self, frame: &str) -> VenueMessage {
        let typed: TypedFrame = match serde_json::from_str(frame) {
            Ok(typed) => typed,
            Err(_) => return VenueMessage::Ignore,
        };
        match typed.frame_type.as_str() {
            "match" => match self.convert(typed) {
                Some(trade) => VenueMessage::Trades(vec![trade]),
                None => VenueMessage::Ignore,
            },
            "subscriptions" => VenueMessage::Ack,
            _ => VenueMessage::Ignore,
        }
    }
}
