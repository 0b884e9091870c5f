//! SQLite-backed repositories
//!
//! Four tables: `price_history` for canonical prices and one candle table
//! per resolution. Decimal values are stored as text to keep aggregation
//! idempotent; `sources` is a canonical JSON string so engines without
//! native array types accept it unchanged.

pub mod candles;
pub mod prices;

pub use candles::{CandleRepo, CursorPage, CursorQuery, OffsetPage};
pub use prices::PriceHistoryRepo;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use priceverse_core::{CoreError, CoreResult};

/// Row ordering for range reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Shared connection handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database file and its schema
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Arc<Self>> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::database(format!("create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CoreError::database(format!("open database: {e}")))?;
        let db = Arc::new(Self {
            conn: Mutex::new(conn),
        });
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> CoreResult<Arc<Self>> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::database(format!("open in-memory database: {e}")))?;
        let db = Arc::new(Self {
            conn: Mutex::new(conn),
        });
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> CoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::database("connection lock poisoned"))
    }

    /// Trivial round-trip, returning the observed latency in milliseconds
    pub fn ping(&self) -> CoreResult<u64> {
        let started = std::time::Instant::now();
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| CoreError::database(format!("ping: {e}")))?;
        Ok(started.elapsed().as_millis() as u64)
    }

    fn init_schema(&self) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                price TEXT NOT NULL,
                event_time INTEGER NOT NULL,
                method TEXT NOT NULL DEFAULT 'vwap',
                sources TEXT NOT NULL,
                volume TEXT NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_price_history_pair_time
            ON price_history(pair, event_time);

            CREATE INDEX IF NOT EXISTS idx_price_history_time
            ON price_history(event_time);

            CREATE TABLE IF NOT EXISTS price_history_5min (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                period_start INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                vwap TEXT,
                trade_count INTEGER NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                UNIQUE(pair, period_start)
            );

            CREATE TABLE IF NOT EXISTS price_history_1hour (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                period_start INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                vwap TEXT,
                trade_count INTEGER NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                UNIQUE(pair, period_start)
            );

            CREATE TABLE IF NOT EXISTS price_history_1day (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                period_start INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                vwap TEXT,
                trade_count INTEGER NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                UNIQUE(pair, period_start)
            );
            "#,
        )
        .map_err(|e| CoreError::database(format!("init schema: {e}")))?;
        Ok(())
    }
}

pub(crate) fn db_err(context: &str, e: rusqlite::Error) -> CoreError {
    CoreError::database(format!("{context}: {e}"))
}

/// Retry a transient storage operation with exponential backoff:
/// 500ms, 1s, 2s. Non-transient errors surface immediately.
pub async fn retry_transient<T, F>(mut op: F, attempts: u32) -> CoreResult<T>
where
    F: FnMut() -> CoreResult<T>,
{
    let mut delay = Duration::from_millis(500);
    let mut last_err = None;
    for attempt in 0..attempts.max(1) {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.code.is_transient() && attempt + 1 < attempts => {
                warn!(
                    "transient storage error (attempt {}/{}): {}",
                    attempt + 1,
                    attempts,
                    e
                );
                last_err = Some(e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| CoreError::internal("retry exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let mut calls = 0;
        let result: CoreResult<()> = retry_transient(
            || {
                calls += 1;
                Err(CoreError::database("locked"))
            },
            3,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let mut calls = 0;
        let result = retry_transient(
            || {
                calls += 1;
                if calls < 2 {
                    Err(CoreError::database("locked"))
                } else {
                    Ok(42)
                }
            },
            3,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_validation_errors_not_retried() {
        let mut calls = 0;
        let result: CoreResult<()> = retry_transient(
            || {
                calls += 1;
                Err(CoreError::invalid_params("bad"))
            },
            3,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
