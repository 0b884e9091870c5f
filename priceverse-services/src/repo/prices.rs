//! Canonical price history repository

use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use priceverse_core::{CoreError, CoreResult, Pair, PricePoint};

use super::{db_err, Database, SortOrder};

/// Hard cap on range reads
const MAX_RANGE_LIMIT: usize = 10_000;

/// Default when the caller does not specify a limit
const DEFAULT_RANGE_LIMIT: usize = 1_000;

pub struct PriceHistoryRepo {
    db: Arc<Database>,
}

impl PriceHistoryRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, point: &PricePoint) -> CoreResult<()> {
        let sources = serde_json::to_string(&point.sources)
            .map_err(|e| CoreError::internal(format!("serialize sources: {e}")))?;
        let conn = self.db.conn()?;
        conn.execute(
            r#"
            INSERT INTO price_history (pair, price, event_time, method, sources, volume)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                point.pair.as_str(),
                point.price.to_string(),
                point.event_time_ms,
                point.method,
                sources,
                point.volume.to_string(),
            ],
        )
        .map_err(|e| db_err("insert price", e))?;
        Ok(())
    }

    pub fn insert_many(&self, points: &[PricePoint]) -> CoreResult<()> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_err("begin insert_many", e))?;
        for point in points {
            let sources = serde_json::to_string(&point.sources)
                .map_err(|e| CoreError::internal(format!("serialize sources: {e}")))?;
            tx.execute(
                r#"
                INSERT INTO price_history (pair, price, event_time, method, sources, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    point.pair.as_str(),
                    point.price.to_string(),
                    point.event_time_ms,
                    point.method,
                    sources,
                    point.volume.to_string(),
                ],
            )
            .map_err(|e| db_err("insert_many price", e))?;
        }
        tx.commit().map_err(|e| db_err("commit insert_many", e))?;
        Ok(())
    }

    pub fn latest(&self, pair: Pair) -> CoreResult<Option<PricePoint>> {
        let conn = self.db.conn()?;
        conn.query_row(
            r#"
            SELECT pair, price, event_time, method, sources, volume
            FROM price_history WHERE pair = ?1
            ORDER BY event_time DESC LIMIT 1
            "#,
            params![pair.as_str()],
            row_to_point,
        )
        .optional()
        .map_err(|e| db_err("latest price", e))?
        .transpose()
    }

    /// First row at or after `t_ms`
    pub fn first_after(&self, pair: Pair, t_ms: i64) -> CoreResult<Option<PricePoint>> {
        let conn = self.db.conn()?;
        conn.query_row(
            r#"
            SELECT pair, price, event_time, method, sources, volume
            FROM price_history WHERE pair = ?1 AND event_time >= ?2
            ORDER BY event_time ASC LIMIT 1
            "#,
            params![pair.as_str(), t_ms],
            row_to_point,
        )
        .optional()
        .map_err(|e| db_err("first_after price", e))?
        .transpose()
    }

    /// Last row at or before `t_ms`
    pub fn last_before(&self, pair: Pair, t_ms: i64) -> CoreResult<Option<PricePoint>> {
        let conn = self.db.conn()?;
        conn.query_row(
            r#"
            SELECT pair, price, event_time, method, sources, volume
            FROM price_history WHERE pair = ?1 AND event_time <= ?2
            ORDER BY event_time DESC LIMIT 1
            "#,
            params![pair.as_str(), t_ms],
            row_to_point,
        )
        .optional()
        .map_err(|e| db_err("last_before price", e))?
        .transpose()
    }

    /// Rows with `event_time` in `[from_ms, to_ms)`. The limit is clamped to
    /// 10_000 and defaults to 1_000 to bound memory on wide ranges.
    pub fn in_range(
        &self,
        pair: Pair,
        from_ms: i64,
        to_ms: i64,
        limit: Option<usize>,
        offset: usize,
        order: SortOrder,
    ) -> CoreResult<Vec<PricePoint>> {
        let limit = limit.unwrap_or(DEFAULT_RANGE_LIMIT).min(MAX_RANGE_LIMIT);
        let conn = self.db.conn()?;
        let sql = format!(
            r#"
            SELECT pair, price, event_time, method, sources, volume
            FROM price_history
            WHERE pair = ?1 AND event_time >= ?2 AND event_time < ?3
            ORDER BY event_time {} LIMIT ?4 OFFSET ?5
            "#,
            order.sql()
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("prepare in_range", e))?;
        let rows = stmt
            .query_map(
                params![pair.as_str(), from_ms, to_ms, limit as i64, offset as i64],
                row_to_point,
            )
            .map_err(|e| db_err("in_range price", e))?;
        let mut points = Vec::new();
        for row in rows {
            points.push(row.map_err(|e| db_err("in_range row", e))??);
        }
        Ok(points)
    }

    /// Delete rows with `event_time` before `cutoff_ms`; returns the count
    pub fn delete_older_than(&self, cutoff_ms: i64) -> CoreResult<usize> {
        let conn = self.db.conn()?;
        conn.execute(
            "DELETE FROM price_history WHERE event_time < ?1",
            params![cutoff_ms],
        )
        .map_err(|e| db_err("delete_older_than price", e))
    }
}

fn row_to_point(row: &Row<'_>) -> rusqlite::Result<CoreResult<PricePoint>> {
    let pair_text: String = row.get(0)?;
    let price_text: String = row.get(1)?;
    let event_time_ms: i64 = row.get(2)?;
    let method: String = row.get(3)?;
    let sources_text: String = row.get(4)?;
    let volume_text: String = row.get(5)?;

    Ok((|| {
        let pair = Pair::from_str(&pair_text)?;
        let price = Decimal::from_str(&price_text)
            .map_err(|e| CoreError::database(format!("bad price column: {e}")))?;
        let volume = Decimal::from_str(&volume_text)
            .map_err(|e| CoreError::database(format!("bad volume column: {e}")))?;
        let sources: Vec<String> = serde_json::from_str(&sources_text)
            .map_err(|e| CoreError::database(format!("bad sources column: {e}")))?;
        Ok(PricePoint {
            pair,
            price,
            event_time_ms,
            method,
            sources,
            volume,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use priceverse_core::VWAP_METHOD;
    use rust_decimal_macros::dec;

    fn point(pair: Pair, price: Decimal, t_ms: i64) -> PricePoint {
        PricePoint {
            pair,
            price,
            event_time_ms: t_ms,
            method: VWAP_METHOD.to_string(),
            sources: vec!["binance".into(), "kraken".into()],
            volume: dec!(2.5),
        }
    }

    fn repo() -> PriceHistoryRepo {
        PriceHistoryRepo::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_insert_and_latest() {
        let repo = repo();
        repo.insert(&point(Pair::BtcUsd, dec!(45000), 1000)).unwrap();
        repo.insert(&point(Pair::BtcUsd, dec!(45100), 2000)).unwrap();
        repo.insert(&point(Pair::EthUsd, dec!(3000), 3000)).unwrap();

        let latest = repo.latest(Pair::BtcUsd).unwrap().unwrap();
        assert_eq!(latest.price, dec!(45100));
        assert_eq!(latest.event_time_ms, 2000);
        assert_eq!(latest.sources, vec!["binance", "kraken"]);
        assert_eq!(latest.method, VWAP_METHOD);

        assert!(repo.latest(Pair::XmrUsd).unwrap().is_none());
    }

    #[test]
    fn test_first_after_last_before() {
        let repo = repo();
        for t in [1000, 2000, 3000] {
            repo.insert(&point(Pair::BtcUsd, dec!(100), t)).unwrap();
        }
        assert_eq!(
            repo.first_after(Pair::BtcUsd, 1500).unwrap().unwrap().event_time_ms,
            2000
        );
        assert_eq!(
            repo.last_before(Pair::BtcUsd, 2500).unwrap().unwrap().event_time_ms,
            2000
        );
        assert!(repo.first_after(Pair::BtcUsd, 3500).unwrap().is_none());
    }

    #[test]
    fn test_in_range_half_open_and_order() {
        let repo = repo();
        for t in [1000, 2000, 3000, 4000] {
            repo.insert(&point(Pair::BtcUsd, Decimal::from(t), t)).unwrap();
        }
        let asc = repo
            .in_range(Pair::BtcUsd, 1000, 4000, None, 0, SortOrder::Asc)
            .unwrap();
        assert_eq!(asc.len(), 3); // 4000 excluded
        assert_eq!(asc[0].event_time_ms, 1000);

        let desc = repo
            .in_range(Pair::BtcUsd, 1000, 5000, Some(2), 0, SortOrder::Desc)
            .unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].event_time_ms, 4000);
    }

    #[test]
    fn test_delete_older_than() {
        let repo = repo();
        for t in [1000, 2000, 3000] {
            repo.insert(&point(Pair::BtcUsd, dec!(1), t)).unwrap();
        }
        let deleted = repo.delete_older_than(2500).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            repo.in_range(Pair::BtcUsd, 0, i64::MAX, None, 0, SortOrder::Asc)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_insert_many_atomic() {
        let repo = repo();
        let points = vec![
            point(Pair::BtcUsd, dec!(1), 1000),
            point(Pair::BtcRub, dec!(95), 1000),
        ];
        repo.insert_many(&points).unwrap();
        assert!(repo.latest(Pair::BtcRub).unwrap().is_some());
    }
}
