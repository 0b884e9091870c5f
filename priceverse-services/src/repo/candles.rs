//! Candle repository with offset and keyset pagination

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use priceverse_core::{
    decode_cursor, encode_cursor, Candle, CoreError, CoreResult, Pair, Resolution,
};

use super::{db_err, Database, SortOrder};

fn table(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::FiveMin => "price_history_5min",
        Resolution::OneHour => "price_history_1hour",
        Resolution::OneDay => "price_history_1day",
    }
}

/// Keyset pagination request
#[derive(Debug, Clone, Default)]
pub struct CursorQuery {
    pub limit: usize,
    pub cursor: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Defaults to descending by period start
    pub order: Option<SortOrder>,
}

/// Keyset pagination reply
#[derive(Debug, Clone)]
pub struct CursorPage {
    pub rows: Vec<Candle>,
    pub next_cursor: Option<String>,
    pub previous_cursor: Option<String>,
    pub has_more: bool,
}

/// Offset pagination reply
#[derive(Debug, Clone)]
pub struct OffsetPage {
    pub rows: Vec<Candle>,
    pub total: u64,
}

pub struct CandleRepo {
    db: Arc<Database>,
}

impl CandleRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace on `(pair, period_start)`; recomputes are
    /// last-writer-wins by design.
    pub fn upsert(&self, resolution: Resolution, candle: &Candle) -> CoreResult<()> {
        let conn = self.db.conn()?;
        let sql = format!(
            r#"
            INSERT INTO {} (pair, period_start, open, high, low, close, volume, vwap, trade_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(pair, period_start) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                vwap = excluded.vwap,
                trade_count = excluded.trade_count
            "#,
            table(resolution)
        );
        conn.execute(
            &sql,
            params![
                candle.pair.as_str(),
                candle.period_start.timestamp(),
                candle.open.to_string(),
                candle.high.to_string(),
                candle.low.to_string(),
                candle.close.to_string(),
                candle.volume.to_string(),
                candle.vwap.map(|v| v.to_string()),
                candle.trade_count as i64,
            ],
        )
        .map_err(|e| db_err("upsert candle", e))?;
        Ok(())
    }

    pub fn latest(&self, resolution: Resolution, pair: Pair) -> CoreResult<Option<Candle>> {
        let conn = self.db.conn()?;
        let sql = format!(
            r#"
            SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count
            FROM {} WHERE pair = ?1 ORDER BY period_start DESC LIMIT 1
            "#,
            table(resolution)
        );
        conn.query_row(&sql, params![pair.as_str()], row_to_candle)
            .optional()
            .map_err(|e| db_err("latest candle", e))?
            .transpose()
    }

    pub fn count(&self, resolution: Resolution, pair: Pair) -> CoreResult<u64> {
        let conn = self.db.conn()?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE pair = ?1", table(resolution));
        conn.query_row(&sql, params![pair.as_str()], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| db_err("count candles", e))
    }

    pub fn delete_older_than(
        &self,
        resolution: Resolution,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<usize> {
        let conn = self.db.conn()?;
        let sql = format!("DELETE FROM {} WHERE period_start < ?1", table(resolution));
        conn.execute(&sql, params![cutoff.timestamp()])
            .map_err(|e| db_err("delete_older_than candles", e))
    }

    /// Candles in `[from, to)` ascending — the OHLCV read path
    pub fn in_period(
        &self,
        resolution: Resolution,
        pair: Pair,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<Candle>> {
        let conn = self.db.conn()?;
        let sql = format!(
            r#"
            SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count
            FROM {} WHERE pair = ?1 AND period_start >= ?2 AND period_start < ?3
            ORDER BY period_start ASC
            "#,
            table(resolution)
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("prepare in_period", e))?;
        let rows = stmt
            .query_map(
                params![pair.as_str(), from.timestamp(), to.timestamp()],
                row_to_candle,
            )
            .map_err(|e| db_err("in_period candles", e))?;
        let mut candles = Vec::new();
        for row in rows {
            candles.push(row.map_err(|e| db_err("in_period row", e))??);
        }
        Ok(candles)
    }

    /// Offset pagination, newest first, with total count
    pub fn get_with_offset(
        &self,
        resolution: Resolution,
        pair: Pair,
        limit: usize,
        offset: usize,
    ) -> CoreResult<OffsetPage> {
        let total = self.count(resolution, pair)?;
        let conn = self.db.conn()?;
        let sql = format!(
            r#"
            SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count
            FROM {} WHERE pair = ?1
            ORDER BY period_start DESC LIMIT ?2 OFFSET ?3
            "#,
            table(resolution)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_err("prepare get_with_offset", e))?;
        let rows = stmt
            .query_map(
                params![pair.as_str(), limit as i64, offset as i64],
                row_to_candle,
            )
            .map_err(|e| db_err("get_with_offset candles", e))?;
        let mut candles = Vec::new();
        for row in rows {
            candles.push(row.map_err(|e| db_err("get_with_offset row", e))??);
        }
        Ok(OffsetPage {
            rows: candles,
            total,
        })
    }

    /// Keyset pagination. Fetches `limit + 1` rows to detect another page;
    /// the extra row's period-start becomes `next_cursor`. When the caller
    /// supplied a cursor, the first row's period-start is echoed back as
    /// `previous_cursor`.
    pub fn get_with_cursor(
        &self,
        resolution: Resolution,
        pair: Pair,
        query: CursorQuery,
    ) -> CoreResult<CursorPage> {
        let order = query.order.unwrap_or(SortOrder::Desc);
        let boundary = query.cursor.as_deref().map(decode_cursor).transpose()?;

        let mut clauses = vec!["pair = ?1".to_string()];
        let mut values: Vec<i64> = Vec::new();
        let mut idx = 2;

        if let Some(boundary) = boundary {
            // The cursor names the first row of the requested page, so the
            // boundary is inclusive.
            let cmp = match order {
                SortOrder::Desc => "<=",
                SortOrder::Asc => ">=",
            };
            clauses.push(format!("period_start {cmp} ?{idx}"));
            values.push(boundary.timestamp());
            idx += 1;
        }
        if let Some(from) = query.from {
            clauses.push(format!("period_start >= ?{idx}"));
            values.push(from.timestamp());
            idx += 1;
        }
        if let Some(to) = query.to {
            clauses.push(format!("period_start <= ?{idx}"));
            values.push(to.timestamp());
            idx += 1;
        }

        let fetch = query.limit + 1;
        let sql = format!(
            r#"
            SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count
            FROM {} WHERE {}
            ORDER BY period_start {} LIMIT ?{idx}
            "#,
            table(resolution),
            clauses.join(" AND "),
            order.sql(),
        );

        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_err("prepare get_with_cursor", e))?;

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(pair.as_str().to_string())];
        for value in &values {
            params_vec.push(Box::new(*value));
        }
        params_vec.push(Box::new(fetch as i64));

        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                row_to_candle,
            )
            .map_err(|e| db_err("get_with_cursor candles", e))?;

        let mut candles: Vec<Candle> = Vec::new();
        for row in rows {
            candles.push(row.map_err(|e| db_err("get_with_cursor row", e))??);
        }

        let has_more = candles.len() > query.limit;
        let next_cursor = if has_more {
            candles.pop().map(|extra| encode_cursor(extra.period_start))
        } else {
            None
        };
        let previous_cursor = match (&query.cursor, candles.first()) {
            (Some(_), Some(first)) => Some(encode_cursor(first.period_start)),
            _ => None,
        };

        Ok(CursorPage {
            rows: candles,
            next_cursor,
            previous_cursor,
            has_more,
        })
    }
}

fn row_to_candle(row: &Row<'_>) -> rusqlite::Result<CoreResult<Candle>> {
    let pair_text: String = row.get(0)?;
    let period_start_secs: i64 = row.get(1)?;
    let open: String = row.get(2)?;
    let high: String = row.get(3)?;
    let low: String = row.get(4)?;
    let close: String = row.get(5)?;
    let volume: String = row.get(6)?;
    let vwap: Option<String> = row.get(7)?;
    let trade_count: i64 = row.get(8)?;

    Ok((|| {
        let dec = |text: &str| {
            Decimal::from_str(text)
                .map_err(|e| CoreError::database(format!("bad decimal column: {e}")))
        };
        Ok(Candle {
            pair: Pair::from_str(&pair_text)?,
            period_start: DateTime::from_timestamp(period_start_secs, 0)
                .ok_or_else(|| CoreError::database("bad period_start column"))?,
            open: dec(&open)?,
            high: dec(&high)?,
            low: dec(&low)?,
            close: dec(&close)?,
            volume: dec(&volume)?,
            vwap: vwap.as_deref().map(dec).transpose()?,
            trade_count: trade_count as u64,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(pair: Pair, period_start: DateTime<Utc>, close: Decimal) -> Candle {
        Candle {
            pair,
            period_start,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close,
            volume: dec!(4),
            vwap: Some(dec!(103)),
            trade_count: 3,
        }
    }

    fn repo() -> CandleRepo {
        CandleRepo::new(Database::open_in_memory().unwrap())
    }

    fn t(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, hour, min, 0).unwrap()
    }

    #[test]
    fn test_upsert_is_idempotent_and_last_writer_wins() {
        let repo = repo();
        let first = candle(Pair::BtcUsd, t(10, 0), dec!(105));
        repo.upsert(Resolution::FiveMin, &first).unwrap();
        repo.upsert(Resolution::FiveMin, &first).unwrap();
        assert_eq!(repo.count(Resolution::FiveMin, Pair::BtcUsd).unwrap(), 1);

        let recomputed = candle(Pair::BtcUsd, t(10, 0), dec!(107));
        repo.upsert(Resolution::FiveMin, &recomputed).unwrap();
        let latest = repo.latest(Resolution::FiveMin, Pair::BtcUsd).unwrap().unwrap();
        assert_eq!(latest.close, dec!(107));
        assert_eq!(repo.count(Resolution::FiveMin, Pair::BtcUsd).unwrap(), 1);
    }

    #[test]
    fn test_resolutions_are_separate_tables() {
        let repo = repo();
        repo.upsert(Resolution::FiveMin, &candle(Pair::BtcUsd, t(10, 0), dec!(1)))
            .unwrap();
        assert_eq!(repo.count(Resolution::OneHour, Pair::BtcUsd).unwrap(), 0);
    }

    #[test]
    fn test_offset_page() {
        let repo = repo();
        for i in 0..5 {
            repo.upsert(
                Resolution::OneHour,
                &candle(Pair::BtcUsd, t(i, 0), Decimal::from(i)),
            )
            .unwrap();
        }
        let page = repo
            .get_with_offset(Resolution::OneHour, Pair::BtcUsd, 2, 1)
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.rows.len(), 2);
        // Newest first, offset 1 skips hour 4
        assert_eq!(page.rows[0].period_start, t(3, 0));
    }

    #[test]
    fn test_cursor_pages_are_disjoint_and_linked() {
        let repo = repo();
        for i in 0..6 {
            repo.upsert(
                Resolution::FiveMin,
                &candle(Pair::BtcUsd, t(10, i * 5), Decimal::from(i)),
            )
            .unwrap();
        }

        let first = repo
            .get_with_cursor(
                Resolution::FiveMin,
                Pair::BtcUsd,
                CursorQuery {
                    limit: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(first.rows.len(), 2);
        assert!(first.has_more);
        assert!(first.previous_cursor.is_none());
        let next = first.next_cursor.clone().unwrap();

        let second = repo
            .get_with_cursor(
                Resolution::FiveMin,
                Pair::BtcUsd,
                CursorQuery {
                    limit: 2,
                    cursor: Some(next.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(second.rows.len(), 2);
        // The page starts exactly at the cursor's period-start
        assert_eq!(
            second.rows[0].period_start,
            decode_cursor(&next).unwrap()
        );

        // Pages are disjoint and keep the same descending order
        let first_starts: Vec<_> = first.rows.iter().map(|c| c.period_start).collect();
        let second_starts: Vec<_> = second.rows.iter().map(|c| c.period_start).collect();
        assert!(first_starts.iter().all(|s| !second_starts.contains(s)));
        assert!(second_starts[0] > second_starts[1]);
        assert!(first_starts[1] > second_starts[0]);

        // previousCursor resolves back to this page's first period-start
        let prev = second.previous_cursor.unwrap();
        assert_eq!(decode_cursor(&prev).unwrap(), second_starts[0]);
    }

    #[test]
    fn test_cursor_range_bounds() {
        let repo = repo();
        for i in 0..6 {
            repo.upsert(
                Resolution::OneHour,
                &candle(Pair::BtcUsd, t(i, 0), Decimal::from(i)),
            )
            .unwrap();
        }
        let page = repo
            .get_with_cursor(
                Resolution::OneHour,
                Pair::BtcUsd,
                CursorQuery {
                    limit: 10,
                    from: Some(t(1, 0)),
                    to: Some(t(3, 0)),
                    order: Some(SortOrder::Asc),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.rows[0].period_start, t(1, 0));
        assert!(!page.has_more);
    }

    #[test]
    fn test_delete_older_than() {
        let repo = repo();
        for i in 0..4 {
            repo.upsert(
                Resolution::OneDay,
                &candle(
                    Pair::BtcUsd,
                    Utc.with_ymd_and_hms(2024, 6, 10 + i, 0, 0, 0).unwrap(),
                    dec!(1),
                ),
            )
            .unwrap();
        }
        let deleted = repo
            .delete_older_than(
                Resolution::OneDay,
                Utc.with_ymd_and_hms(2024, 6, 12, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.count(Resolution::OneDay, Pair::BtcUsd).unwrap(), 2);
    }
}
