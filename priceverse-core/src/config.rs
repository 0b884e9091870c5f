//! Layered configuration
//!
//! Precedence: config file < environment. Environment variables use the
//! `PRICEVERSE` prefix with `__` as the nesting separator, e.g.
//! `PRICEVERSE_AGGREGATION__WINDOW_SIZE=30000`. File keys accept both
//! snake_case and the camelCase spellings used by deploy tooling.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub exchanges: ExchangesConfig,
    pub aggregation: AggregationConfig,
    pub cbr: CbrConfig,
    pub retention: RetentionConfig,
    pub alerts: AlertsConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load from an optional file path layered under the environment
    pub fn load(path: Option<&str>) -> CoreResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("PRICEVERSE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("exchanges.enabled")
                .with_list_parse_key("aggregation.pairs")
                .try_parsing(true),
        );
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CoreError::invalid_params(format!("config error: {e}")))
    }
}

/// RPC server bind
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub host: String,
    pub port: u16,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dialect: String,
    pub host: String,
    pub port: u16,
    /// For the embedded engine this is the database file path
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    #[serde(alias = "sslRejectUnauthorized")]
    pub ssl_reject_unauthorized: bool,
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: "sqlite".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "data/priceverse.db".to_string(),
            user: String::new(),
            password: String::new(),
            ssl: false,
            ssl_reject_unauthorized: true,
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min: u32,
    pub max: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(pass) => format!("redis://:{}@{}:{}/{}", pass, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangesConfig {
    /// Subset of the six venues to run
    pub enabled: Vec<String>,
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        Self {
            enabled: ["binance", "bybit", "coinbase", "kraken", "kucoin", "okx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Tick interval, milliseconds
    #[serde(alias = "interval")]
    pub interval_ms: u64,
    /// Trailing VWAP window, milliseconds
    #[serde(alias = "windowSize", alias = "window_size")]
    pub window_size_ms: u64,
    /// Base pairs to aggregate
    pub pairs: Vec<String>,
    #[serde(alias = "maxConsecutiveErrors")]
    pub max_consecutive_errors: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            window_size_ms: 30_000,
            pairs: ["btc-usd", "eth-usd", "xmr-usd"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_consecutive_errors: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CbrConfig {
    pub url: String,
    /// Seconds a fetched rate stays fresh
    #[serde(alias = "cacheTtl", alias = "cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(alias = "retryAttempts")]
    pub retry_attempts: u32,
    #[serde(alias = "retryDelay", alias = "retry_delay")]
    pub retry_delay_ms: u64,
    /// Rate used when the source has never succeeded
    #[serde(alias = "fallbackRate")]
    pub fallback_rate: f64,
}

impl Default for CbrConfig {
    fn default() -> Self {
        Self {
            url: "https://www.cbr-xml-daily.ru/daily_json.js".to_string(),
            cache_ttl_secs: 3600,
            retry_attempts: 3,
            retry_delay_ms: 5000,
            fallback_rate: 90.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    /// Zero means keep forever
    #[serde(alias = "priceHistoryDays")]
    pub price_history_days: u32,
    #[serde(alias = "candles5minDays")]
    pub candles_5min_days: u32,
    #[serde(alias = "candles1hourDays")]
    pub candles_1hour_days: u32,
    #[serde(alias = "candles1dayDays")]
    pub candles_1day_days: u32,
    #[serde(alias = "cleanupSchedule")]
    pub cleanup_schedule: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            price_history_days: 7,
            candles_5min_days: 30,
            candles_1hour_days: 365,
            candles_1day_days: 0,
            cleanup_schedule: "0 3 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    #[serde(alias = "webhookUrl")]
    pub webhook_url: Option<String>,
    pub thresholds: AlertThresholds,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Collector disconnect duration that raises a warning, seconds
    #[serde(alias = "collectorDisconnectSecs")]
    pub collector_disconnect_secs: u64,
    /// Aggregator consecutive-error count that raises a critical
    #[serde(alias = "aggregatorConsecutiveErrors")]
    pub aggregator_consecutive_errors: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            collector_disconnect_secs: 300,
            aggregator_consecutive_errors: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(alias = "rateLimit")]
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    #[serde(alias = "maxRequests")]
    pub max_requests: u64,
    #[serde(alias = "windowMs")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to cached canonical prices, seconds
    #[serde(alias = "priceTtlSecs")]
    pub price_ttl_secs: u64,
    /// Cached price older than this is treated as a miss, seconds
    #[serde(alias = "staleAfterSecs")]
    pub stale_after_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            price_ttl_secs: 60,
            stale_after_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Close a subscriber after this long without a message, seconds
    #[serde(alias = "idleTimeout", alias = "idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Bounded subscriber queue, drop-oldest beyond this
    #[serde(alias = "maxQueueSize")]
    pub max_queue_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            max_queue_size: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.aggregation.interval_ms, 10_000);
        assert_eq!(cfg.aggregation.window_size_ms, 30_000);
        assert_eq!(cfg.cbr.cache_ttl_secs, 3600);
        assert_eq!(cfg.retention.candles_1day_days, 0);
        assert_eq!(cfg.api.rate_limit.max_requests, 100);
        assert_eq!(cfg.api.streaming.max_queue_size, 1000);
        assert_eq!(cfg.exchanges.enabled.len(), 6);
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");
        redis.password = Some("secret".to_string());
        assert_eq!(redis.url(), "redis://:secret@127.0.0.1:6379/0");
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("PRICEVERSE_AGGREGATION__WINDOW_SIZE", "45000");
        std::env::set_var("PRICEVERSE_APP__PORT", "9090");
        let cfg = AppConfig::load(None).unwrap();
        std::env::remove_var("PRICEVERSE_AGGREGATION__WINDOW_SIZE");
        std::env::remove_var("PRICEVERSE_APP__PORT");
        assert_eq!(cfg.aggregation.window_size_ms, 45_000);
        assert_eq!(cfg.app.port, 9090);
    }
}
