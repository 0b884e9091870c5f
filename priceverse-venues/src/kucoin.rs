//! KuCoin trade feed adapter
//!
//! Two-phase session: POST the public bullet endpoint to obtain the socket
//! endpoint, a token, and the ping interval, then connect to
//! `endpoint?token=…`. A `welcome` frame must arrive before subscribing and
//! an `ack` follows the subscribe. The connection stays alive through client
//! pings at the advertised interval plus pong replies to server pings.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use priceverse_core::{CoreError, CoreResult, Pair, Trade, Venue};

use crate::adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};

const KUCOIN_BULLET_URL: &str = "https://api.kucoin.com/api/v1/bullet-public";

const BULLET_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct BulletResponse {
    code: String,
    data: BulletData,
}

#[derive(Debug, Deserialize)]
struct BulletData {
    token: String,
    #[serde(rename = "instanceServers")]
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
struct InstanceServer {
    endpoint: String,
    #[serde(rename = "pingInterval")]
    ping_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
struct TypedFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<MatchData>,
}

/// `/market/match` payload
#[derive(Debug, Deserialize)]
struct MatchData {
    symbol: String,
    size: String,
    price: String,
    /// Venue-reported time; nanoseconds on current feeds
    time: String,
    #[serde(rename = "tradeId")]
    trade_id: String,
}

pub struct KucoinAdapter {
    symbols: SymbolMap,
    http: reqwest::Client,
    bullet_url: String,
}

impl KucoinAdapter {
    pub fn new() -> Self {
        Self::with_bullet_url(KUCOIN_BULLET_URL)
    }

    pub fn with_bullet_url(bullet_url: impl Into<String>) -> Self {
        Self {
            symbols: SymbolMap::new(&[
                (Pair::BtcUsd, "BTC-USDT"),
                (Pair::EthUsd, "ETH-USDT"),
                (Pair::XmrUsd, "XMR-USDT"),
            ]),
            http: reqwest::Client::builder()
                .timeout(BULLET_TIMEOUT)
                .build()
                .unwrap_or_default(),
            bullet_url: bullet_url.into(),
        }
    }

    fn convert(&self, data: MatchData) -> Option<Trade> {
        let pair = self.symbols.pair(&data.symbol)?;
        let price = Decimal::from_str(&data.price).ok()?;
        let volume = Decimal::from_str(&data.size).ok()?;
        let raw_time: i128 = data.time.parse().ok()?;
        // Nanoseconds on the wire; tolerate feeds already in milliseconds
        let event_time_ms = if raw_time > 1_000_000_000_000_000 {
            (raw_time / 1_000_000) as i64
        } else {
            raw_time as i64
        };
        Some(Trade {
            venue: Venue::Kucoin,
            pair,
            price,
            volume,
            event_time_ms,
            venue_trade_id: data.trade_id,
        })
    }
}

impl Default for KucoinAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for KucoinAdapter {
    fn venue(&self) -> Venue {
        Venue::Kucoin
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn session(&self) -> CoreResult<SessionSpec> {
        let response = self
            .http
            .post(&self.bullet_url)
            .send()
            .await
            .map_err(|e| CoreError::internal(format!("kucoin bullet request: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::internal(format!(
                "kucoin bullet returned {}",
                response.status()
            )));
        }
        let bullet: BulletResponse = response
            .json()
            .await
            .map_err(|e| CoreError::internal(format!("kucoin bullet parse: {e}")))?;
        if bullet.code != "200000" {
            return Err(CoreError::internal(format!(
                "kucoin bullet code {}",
                bullet.code
            )));
        }
        let server = bullet
            .data
            .instance_servers
            .first()
            .ok_or_else(|| CoreError::internal("kucoin bullet: no instance servers"))?;

        Ok(SessionSpec {
            url: format!("{}?token={}", server.endpoint, bullet.data.token),
            ping_interval: Some(Duration::from_millis(server.ping_interval_ms)),
            requires_welcome: true,
        })
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        let topic: Vec<&str> = self.symbols.symbols().collect();
        vec![serde_json::json!({
            "id": "1",
            "type": "subscribe",
            "topic": format!("/market/match:{}", topic.join(",")),
            "privateChannel": false,
            "response": true
        })
        .to_string()]
    }

    fn parse_message(&self, frame: &str) -> VenueMessage {
        let typed: TypedFrame = match serde_json::from_str(frame) {
            Ok(typed) => typed,
            Err(_) => return VenueMessage::Ignore,
        };
        match typed.frame_type.as_str() {
            "welcome" => VenueMessage::Welcome,
            "ack" => VenueMessage::Ack,
            "ping" => {
                // Server-initiated ping must be answered with its id
                let id = typed.id.unwrap_or_default();
                VenueMessage::Ping(
                    serde_json::json!({"id": id, "type": "pong"}).to_string(),
                )
            }
            "message"
                if typed
                    .topic
                    .as_deref()
                    .is_some_and(|t| t.starts_with("/market/match")) =>
            {
                match typed.data.and_then(|data| self.convert(data)) {
                    Some(trade) => VenueMessage::Trades(vec![trade]),
                    None => VenueMessage::Ignore,
                }
            }
            _ => VenueMessage::Ignore,
        }
    }

    fn ping_payload(&self) -> Option<String> {
        Some(
            serde_json::json!({
                "id": Utc::now().timestamp_millis().to_string(),
                "type": "ping"
            })
            .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_welcome_then_ack() {
        let adapter = KucoinAdapter::new();
        assert_eq!(
            adapter.parse_message(r#"{"id":"abc","type":"welcome"}"#),
            VenueMessage::Welcome
        );
        assert_eq!(
            adapter.parse_message(r#"{"id":"1","type":"ack"}"#),
            VenueMessage::Ack
        );
    }

    #[test]
    fn test_server_ping_answered_with_pong() {
        let adapter = KucoinAdapter::new();
        match adapter.parse_message(r#"{"id":"77","type":"ping"}"#) {
            VenueMessage::Ping(reply) => {
                let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
                assert_eq!(value["id"], "77");
                assert_eq!(value["type"], "pong");
            }
            other => panic!("expected ping reply, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_match_with_nanosecond_time() {
        let adapter = KucoinAdapter::new();
        let frame = r#"{
            "type": "message",
            "topic": "/market/match:BTC-USDT",
            "subject": "trade.l3match",
            "data": {
                "sequence": "1545896669145",
                "symbol": "BTC-USDT",
                "side": "buy",
                "size": "0.01",
                "price": "16800.5",
                "time": "1545914149935808589",
                "tradeId": "5e5406d"
            }
        }"#;
        match adapter.parse_message(frame) {
            VenueMessage::Trades(trades) => {
                assert_eq!(trades[0].pair, Pair::BtcUsd);
                assert_eq!(trades[0].price, dec!(16800.5));
                assert_eq!(trades[0].volume, dec!(0.01));
                assert_eq!(trades[0].event_time_ms, 1545914149935);
                assert_eq!(trades[0].venue_trade_id, "5e5406d");
            }
            other => panic!("expected trades, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_payload_shape() {
        let adapter = KucoinAdapter::new();
        let payload = adapter.ping_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "ping");
        assert!(value["id"].is_string());
    }
}
