//! Retention sweeper
//!
//! Deletes canonical prices and candles older than their per-table TTLs.
//! A zero TTL means keep forever. Tables are swept independently; one
//! table's failure never blocks the rest.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use priceverse_core::{Resolution, RetentionConfig};

use crate::repo::{CandleRepo, PriceHistoryRepo};

pub struct RetentionSweeper {
    config: RetentionConfig,
    prices: Arc<PriceHistoryRepo>,
    candles: Arc<CandleRepo>,
}

impl RetentionSweeper {
    pub fn new(
        config: RetentionConfig,
        prices: Arc<PriceHistoryRepo>,
        candles: Arc<CandleRepo>,
    ) -> Self {
        Self {
            config,
            prices,
            candles,
        }
    }

    fn candle_ttl_days(&self, resolution: Resolution) -> u32 {
        match resolution {
            Resolution::FiveMin => self.config.candles_5min_days,
            Resolution::OneHour => self.config.candles_1hour_days,
            Resolution::OneDay => self.config.candles_1day_days,
        }
    }

    /// One sweep over every table; returns rows deleted per table
    pub fn sweep(&self, now: DateTime<Utc>) -> HashMap<String, usize> {
        let mut deleted = HashMap::new();
        if !self.config.enabled {
            return deleted;
        }

        if self.config.price_history_days > 0 {
            let cutoff = now - ChronoDuration::days(self.config.price_history_days as i64);
            match self.prices.delete_older_than(cutoff.timestamp_millis()) {
                Ok(n) => {
                    if n > 0 {
                        info!("[Retention] price_history: {} rows deleted", n);
                    }
                    deleted.insert("price_history".to_string(), n);
                }
                Err(e) => warn!("[Retention] price_history sweep failed: {}", e),
            }
        }

        for resolution in Resolution::all() {
            let days = self.candle_ttl_days(*resolution);
            if days == 0 {
                continue;
            }
            let cutoff = now - ChronoDuration::days(days as i64);
            let table = format!("price_history_{resolution}");
            match self.candles.delete_older_than(*resolution, cutoff) {
                Ok(n) => {
                    if n > 0 {
                        info!("[Retention] {}: {} rows deleted", table, n);
                    }
                    deleted.insert(table, n);
                }
                Err(e) => warn!("[Retention] {} sweep failed: {}", table, e),
            }
        }

        deleted
    }
}
