//! Market data repository - imported daily bars and import batches

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One imported file (or API payload) of bars for a single instrument
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketImportRecord {
    pub id: Option<i64>,
    pub file_name: Option<String>,
    pub code: String,
    pub record_count: i64,
    /// "YYYY-MM-DD ~ YYYY-MM-DD"
    pub date_range: Option<String>,
    pub imported_at: Option<i64>,
}

/// A single daily bar
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketBarRecord {
    pub id: Option<i64>,
    pub import_id: Option<i64>,
    pub code: String,
    pub date: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

/// Latest two closes of an instrument, for listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstrumentRecord {
    pub code: String,
    pub latest_date: String,
    pub latest_close: String,
    pub previous_close: Option<String>,
    pub bar_count: i64,
}

/// Repository for market bars
pub struct MarketRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MarketRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an import batch and upsert its bars by `(code, date)`.
    /// Re-importing a date overwrites the earlier values and moves the bar to
    /// the new batch. Earlier batches of the same code get their count and
    /// date range recomputed from the bars they still own.
    pub async fn import_bars(
        &self,
        file_name: Option<&str>,
        code: &str,
        date_range: Option<&str>,
        bars: &[MarketBarRecord],
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"INSERT INTO market_imports (file_name, code, record_count, date_range)
               VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(file_name)
        .bind(code)
        .bind(bars.len() as i64)
        .bind(date_range)
        .execute(&mut *tx)
        .await?;
        let import_id = result.last_insert_rowid();

        for bar in bars {
            sqlx::query(
                r#"INSERT INTO market_bars (import_id, code, date, open, high, low, close, volume)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT(code, date) DO UPDATE SET
                     import_id = excluded.import_id,
                     open = excluded.open,
                     high = excluded.high,
                     low = excluded.low,
                     close = excluded.close,
                     volume = excluded.volume
                "#,
            )
            .bind(import_id)
            .bind(code)
            .bind(&bar.date)
            .bind(&bar.open)
            .bind(&bar.high)
            .bind(&bar.low)
            .bind(&bar.close)
            .bind(&bar.volume)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"UPDATE market_imports SET
                 record_count = (SELECT COUNT(*) FROM market_bars b WHERE b.import_id = market_imports.id),
                 date_range = (SELECT MIN(b.date) || ' ~ ' || MAX(b.date)
                               FROM market_bars b WHERE b.import_id = market_imports.id)
               WHERE code = ?1 AND id <> ?2"#,
        )
        .bind(code)
        .bind(import_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(import_id)
    }

    /// Bars of an instrument in `[start, end]` (inclusive, ISO dates), ascending
    pub async fn get_bars(
        &self,
        code: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> DbResult<Vec<MarketBarRecord>> {
        let mut sql = String::from(
            r#"
            SELECT id, import_id, code, date, open, high, low, close, volume
            FROM market_bars
            WHERE code = ?
            "#,
        );

        let mut binds: Vec<&str> = Vec::new();
        if let Some(s) = start {
            sql.push_str(" AND date >= ?");
            binds.push(s);
        }
        if let Some(e) = end {
            sql.push_str(" AND date <= ?");
            binds.push(e);
        }
        sql.push_str(" ORDER BY date ASC");

        let mut query = sqlx::query_as::<_, MarketBarRecord>(&sql).bind(code);
        for b in binds {
            query = query.bind(b);
        }

        let records = query.fetch_all(self.pool).await?;
        Ok(records)
    }

    /// All import batches, newest first
    pub async fn list_imports(&self) -> DbResult<Vec<MarketImportRecord>> {
        let records = sqlx::query_as::<_, MarketImportRecord>(
            "SELECT id, file_name, code, record_count, date_range, imported_at FROM market_imports ORDER BY id DESC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Delete an import batch and the bars that still belong to it.
    /// Returns false when no batch had that id.
    pub async fn delete_import(&self, id: i64) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM market_bars WHERE import_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM market_imports WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every instrument with bars, with its latest and previous close
    pub async fn list_instruments(&self) -> DbResult<Vec<InstrumentRecord>> {
        let records = sqlx::query_as::<_, InstrumentRecord>(
            r#"
            WITH ranked AS (
              SELECT code, date, close,
                ROW_NUMBER() OVER (PARTITION BY code ORDER BY date DESC) AS rn
              FROM market_bars
            )
            SELECT l.code AS code,
                   l.date AS latest_date,
                   l.close AS latest_close,
                   p.close AS previous_close,
                   (SELECT COUNT(*) FROM market_bars m WHERE m.code = l.code) AS bar_count
            FROM ranked l
            LEFT JOIN ranked p ON p.code = l.code AND p.rn = 2
            WHERE l.rn = 1
            ORDER BY l.code ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
