//! Venue adapter seam
//!
//! A venue adapter owns everything venue-specific: the symbol map, session
//! establishment (including two-phase handshakes), subscribe payloads, frame
//! parsing, and keep-alive behavior. The collector base drives the socket and
//! treats every adapter identically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use priceverse_core::{CoreResult, Pair, Trade, Venue};

/// Fixed pair → venue-symbol mapping with reverse lookup.
/// A pair absent from the map means the venue does not trade it.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    forward: HashMap<Pair, String>,
    reverse: HashMap<String, Pair>,
}

impl SymbolMap {
    pub fn new(entries: &[(Pair, &str)]) -> Self {
        let forward: HashMap<Pair, String> = entries
            .iter()
            .map(|(pair, sym)| (*pair, sym.to_string()))
            .collect();
        let reverse = forward
            .iter()
            .map(|(pair, sym)| (sym.clone(), *pair))
            .collect();
        Self { forward, reverse }
    }

    pub fn symbol(&self, pair: Pair) -> Option<&str> {
        self.forward.get(&pair).map(|s| s.as_str())
    }

    pub fn pair(&self, symbol: &str) -> Option<Pair> {
        self.reverse.get(symbol).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.forward.values().map(|s| s.as_str())
    }

    pub fn pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        self.forward.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Resolved connection parameters for one socket session
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub url: String,
    /// Application-level ping cadence, when the venue requires one
    pub ping_interval: Option<Duration>,
    /// Whether a welcome frame must arrive before subscribing
    pub requires_welcome: bool,
}

impl SessionSpec {
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: None,
            requires_welcome: false,
        }
    }
}

/// Outcome of parsing one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum VenueMessage {
    /// Normalized trades carried by the frame
    Trades(Vec<Trade>),
    /// Session greeting that gates subscription
    Welcome,
    /// Subscription acknowledgement
    Ack,
    /// The venue requests an application-level reply; payload to send back
    Ping(String),
    /// Recognized but carries nothing for the pipeline
    Ignore,
}

/// Everything the collector base needs from a venue
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    fn symbols(&self) -> &SymbolMap;

    /// Resolve the socket URL for a fresh session. Two-phase venues perform
    /// their handshake request here; the rest return a static URL.
    async fn session(&self) -> CoreResult<SessionSpec>;

    /// Payloads to send once the session is ready for subscription
    fn subscribe_payloads(&self) -> Vec<String>;

    /// Parse one text frame. Unrecognized frames map to `Ignore`; parse
    /// failures never kill the connection.
    fn parse_message(&self, frame: &str) -> VenueMessage;

    /// Application-level ping payload, when `SessionSpec::ping_interval` is set
    fn ping_payload(&self) -> Option<String> {
        None
    }
}
