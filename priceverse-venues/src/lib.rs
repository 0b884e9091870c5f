//! Venue collectors for Priceverse
//!
//! One collector per venue: a shared connection-loop base plus adapters that
//! own the venue-specific symbol maps, handshakes, subscribe payloads, and
//! frame parsers.

pub mod adapter;
pub mod binance;
pub mod bybit;
pub mod coinbase;
pub mod collector;
pub mod kraken;
pub mod kucoin;
pub mod okx;

pub use adapter::{SessionSpec, SymbolMap, VenueAdapter, VenueMessage};
pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use coinbase::CoinbaseAdapter;
pub use collector::{Collector, CollectorConfig, CollectorError, CollectorStats, TradeSink};
pub use kraken::KrakenAdapter;
pub use kucoin::KucoinAdapter;
pub use okx::OkxAdapter;

use std::sync::Arc;

use priceverse_core::Venue;

/// Build the adapter for a venue
pub fn adapter_for(venue: Venue) -> Arc<dyn VenueAdapter> {
    match venue {
        Venue::Binance => Arc::new(BinanceAdapter::new()),
        Venue::Bybit => Arc::new(BybitAdapter::new()),
        Venue::Coinbase => Arc::new(CoinbaseAdapter::new()),
        Venue::Kraken => Arc::new(KrakenAdapter::new()),
        Venue::Kucoin => Arc::new(KucoinAdapter::new()),
        Venue::Okx => Arc::new(OkxAdapter::new()),
    }
}
