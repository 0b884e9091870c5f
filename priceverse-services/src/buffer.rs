//! Per-pair trade buffer
//!
//! A volatile, score-ordered multiset of trades keyed by pair, score =
//! event time. Only the stream aggregator reads it; collectors never touch
//! it. Duplicate trades across venues are allowed — venue dedup happens in
//! the VWAP step. Bounded in time (the trailing window), not by count.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use priceverse_core::{Pair, Trade};

/// Score-ordered trade buffer shared between the consumption and tick loops
#[derive(Default)]
pub struct TradeBuffer {
    /// pair -> (event_time_ms, insertion seq) -> trade
    inner: RwLock<HashMap<Pair, BTreeMap<(i64, u64), Trade>>>,
    seq: std::sync::atomic::AtomicU64,
}

impl TradeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trade: Trade) {
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.inner
            .write()
            .entry(trade.pair)
            .or_default()
            .insert((trade.event_time_ms, seq), trade);
    }

    /// Trades with score in `[from_ms, to_ms]`, ascending by event time
    pub fn range(&self, pair: Pair, from_ms: i64, to_ms: i64) -> Vec<Trade> {
        let guard = self.inner.read();
        match guard.get(&pair) {
            Some(buckets) => buckets
                .range((from_ms, 0)..=(to_ms, u64::MAX))
                .map(|(_, trade)| trade.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Evict all entries with score below `cutoff_ms`; returns evicted count
    pub fn evict_before(&self, pair: Pair, cutoff_ms: i64) -> usize {
        let mut guard = self.inner.write();
        match guard.get_mut(&pair) {
            Some(buckets) => {
                let keep = buckets.split_off(&(cutoff_ms, 0));
                let evicted = buckets.len();
                *buckets = keep;
                evicted
            }
            None => 0,
        }
    }

    pub fn len(&self, pair: Pair) -> usize {
        self.inner
            .read()
            .get(&pair)
            .map(|buckets| buckets.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, pair: Pair) -> bool {
        self.len(pair) == 0
    }

    /// Oldest buffered score for a pair, if any
    pub fn oldest_score(&self, pair: Pair) -> Option<i64> {
        self.inner
            .read()
            .get(&pair)
            .and_then(|buckets| buckets.keys().next().map(|(ts, _)| *ts))
    }
}
