//! Pipeline services for Priceverse
//!
//! The venue event log, trade buffer, aggregators, repositories, fiat-rate
//! source, price bus, scheduling, supervision, and the protection surface
//! (health, alerts, retention, rate limiting).

pub mod alerts;
pub mod buffer;
pub mod cbr;
pub mod health;
pub mod ohlcv;
pub mod price_bus;
pub mod rate_limit;
pub mod repo;
pub mod retention;
pub mod scheduler;
pub mod stream_aggregator;
pub mod supervisor;
pub mod venue_log;
pub mod vwap;

pub use alerts::{
    Alert, AlertManager, AlertScanInputs, AlertSeverity, AlertSink, LogSink, WebhookSink,
};
pub use buffer::TradeBuffer;
pub use cbr::{CbrRateSource, RateSource, StaticRateSource};
pub use health::{HealthProbe, SystemHealth};
pub use ohlcv::{build_candle, IntervalStats, OhlcvAggregator};
pub use price_bus::{MemoryPriceBus, PriceBroadcaster, PriceBus, RedisPriceBus};
pub use rate_limit::{
    MemoryRateLimitStore, RateLimitDecision, RateLimitStore, RateLimiter, RedisRateLimitStore,
};
pub use repo::{
    retry_transient, CandleRepo, CursorPage, CursorQuery, Database, OffsetPage, PriceHistoryRepo,
    SortOrder,
};
pub use retention::RetentionSweeper;
pub use scheduler::{CronSpec, JobFuture, Schedule, Scheduler};
pub use stream_aggregator::{
    AggregatorStats, StreamAggregator, StreamAggregatorConfig, CONSUMER_GROUP,
};
pub use supervisor::{Lifecycle, RestartDecision, Supervisor};
pub use venue_log::{LogEntry, MemoryVenueLog, RedisVenueLog, VenueLog, VenueLogSink};
pub use vwap::{compute_vwap, VwapResult};
