//! Core types for Priceverse
//!
//! This crate defines the shared data structures used across the pipeline:
//! trading pairs, normalized trades, canonical prices, candles, the error
//! taxonomy, pagination cursors, the RPC envelope, and configuration.

pub mod candle;
pub mod config;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod health;
pub mod pair;
pub mod price;
pub mod trade;

pub use candle::{Candle, Resolution};
pub use config::{
    AggregationConfig, AlertsConfig, ApiConfig, AppConfig, AppSection, CbrConfig, DatabaseConfig,
    ExchangesConfig, RedisConfig, RetentionConfig,
};
pub use cursor::{decode_cursor, encode_cursor};
pub use envelope::{RpcError, RpcRequest, RpcResponse};
pub use error::{CoreError, CoreResult, ErrorCode};
pub use health::{CheckResult, ComponentHealth, HealthStatus};
pub use pair::{Pair, Venue};
pub use price::{FiatRate, PricePoint, PriceSnapshot, RateStatus, VWAP_METHOD};
pub use trade::Trade;
