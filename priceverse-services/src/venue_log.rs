//! Venue event log
//!
//! A per-venue append-only log with a consumer-group cursor. Collectors own
//! the producer side of their venue's log; the stream aggregator owns the
//! single consumer group across all venues. Delivery is per-venue FIFO and
//! at-least-once; the aggregator tolerates redelivery because the VWAP
//! window computation is idempotent.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;

use priceverse_core::{CoreError, CoreResult, Trade, Venue};
use priceverse_venues::TradeSink;

/// Entry id plus flat field list, as read from the log
pub type LogEntry = (String, Vec<(String, String)>);

/// Contract between collectors, the aggregator, and the log backend
#[async_trait]
pub trait VenueLog: Send + Sync {
    /// Append fields to the venue's log, returning the entry id
    async fn append(&self, venue: Venue, fields: &[(String, String)]) -> CoreResult<String>;

    /// Create the consumer group; a pre-existing group is not an error
    async fn create_group(
        &self,
        venue: Venue,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> CoreResult<()>;

    /// Read up to `count` undelivered entries, blocking up to `block_ms`
    async fn read_group(
        &self,
        venue: Venue,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> CoreResult<Vec<LogEntry>>;

    /// Acknowledge a delivered entry
    async fn ack(&self, venue: Venue, group: &str, entry_id: &str) -> CoreResult<()>;
}

fn stream_key(venue: Venue) -> String {
    format!("stream:trades:{venue}")
}

/// Redis Streams implementation
pub struct RedisVenueLog {
    conn: ConnectionManager,
}

impl RedisVenueLog {
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::redis(format!("open {url}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::redis(format!("connect: {e}")))?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl VenueLog for RedisVenueLog {
    async fn append(&self, venue: Venue, fields: &[(String, String)]) -> CoreResult<String> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        conn.xadd(stream_key(venue), "*", &pairs)
            .await
            .map_err(|e| CoreError::redis(format!("xadd {venue}: {e}")))
    }

    async fn create_group(
        &self,
        venue: Venue,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let key = stream_key(venue);
        let result: Result<(), redis::RedisError> = if mkstream {
            conn.xgroup_create_mkstream(&key, group, start_id).await
        } else {
            conn.xgroup_create(&key, group, start_id).await
        };
        match result {
            Ok(()) => Ok(()),
            // A pre-existing group is the normal restart path
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(CoreError::redis(format!("xgroup create {venue}: {e}"))),
        }
    }

    async fn read_group(
        &self,
        venue: Venue,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> CoreResult<Vec<LogEntry>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[stream_key(venue)], &[">"], &opts)
            .await
            .map_err(|e| CoreError::redis(format!("xreadgroup {venue}: {e}")))?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let mut fields = Vec::with_capacity(id.map.len());
                for (name, value) in id.map {
                    let text: String = redis::from_redis_value(&value)
                        .map_err(|e| CoreError::redis(format!("field {name}: {e}")))?;
                    fields.push((name, text));
                }
                entries.push((id.id, fields));
            }
        }
        Ok(entries)
    }

    async fn ack(&self, venue: Venue, group: &str, entry_id: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream_key(venue), group, &[entry_id])
            .await
            .map_err(|e| CoreError::redis(format!("xack {venue}: {e}")))?;
        Ok(())
    }
}

/// In-memory implementation for hermetic tests. Preserves per-venue FIFO
/// and the delivered/acked distinction; never redelivers on its own.
#[derive(Default)]
pub struct MemoryVenueLog {
    inner: parking_lot::Mutex<MemoryLogState>,
}

#[derive(Default)]
struct MemoryLogState {
    entries: HashMap<Venue, Vec<(String, Vec<(String, String)>)>>,
    /// (venue, group) -> index of the next undelivered entry
    cursors: HashMap<(Venue, String), usize>,
    acked: HashMap<(Venue, String), Vec<String>>,
    next_id: u64,
}

impl MemoryVenueLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry ids acknowledged by a group, for assertions
    pub fn acked_ids(&self, venue: Venue, group: &str) -> Vec<String> {
        self.inner
            .lock()
            .acked
            .get(&(venue, group.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of entries appended for a venue
    pub fn len(&self, venue: Venue) -> usize {
        self.inner
            .lock()
            .entries
            .get(&venue)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VenueLog for MemoryVenueLog {
    async fn append(&self, venue: Venue, fields: &[(String, String)]) -> CoreResult<String> {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        state
            .entries
            .entry(venue)
            .or_default()
            .push((id.clone(), fields.to_vec()));
        Ok(id)
    }

    async fn create_group(
        &self,
        venue: Venue,
        group: &str,
        _start_id: &str,
        _mkstream: bool,
    ) -> CoreResult<()> {
        let mut state = self.inner.lock();
        state
            .cursors
            .entry((venue, group.to_string()))
            .or_insert(0);
        Ok(())
    }

    async fn read_group(
        &self,
        venue: Venue,
        group: &str,
        _consumer: &str,
        count: usize,
        _block_ms: u64,
    ) -> CoreResult<Vec<LogEntry>> {
        let mut state = self.inner.lock();
        let cursor_key = (venue, group.to_string());
        let cursor = *state.cursors.get(&cursor_key).unwrap_or(&0);
        let entries = state.entries.entry(venue).or_default();
        let batch: Vec<LogEntry> = entries
            .iter()
            .skip(cursor)
            .take(count)
            .cloned()
            .collect();
        let delivered = batch.len();
        state.cursors.insert(cursor_key, cursor + delivered);
        Ok(batch)
    }

    async fn ack(&self, venue: Venue, group: &str, entry_id: &str) -> CoreResult<()> {
        self.inner
            .lock()
            .acked
            .entry((venue, group.to_string()))
            .or_default()
            .push(entry_id.to_string());
        Ok(())
    }
}

/// Producer-side adapter handed to collectors
pub struct VenueLogSink {
    log: Arc<dyn VenueLog>,
}

impl VenueLogSink {
    pub fn new(log: Arc<dyn VenueLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl TradeSink for VenueLogSink {
    async fn append(&self, trade: &Trade) -> CoreResult<String> {
        self.log.append(trade.venue, &trade.to_fields()).await
    }
}
