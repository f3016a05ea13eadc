//! Strategy repository - generated grid strategies and their ladder rows

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted strategy header (config only, rows live in `grid_rows`)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StrategyRecord {
    pub id: Option<i64>,
    pub content_hash: String,
    pub name: Option<String>,
    pub a: String,
    pub b: String,
    pub first_trigger_price: String,
    pub total_rows: i64,
    pub buy_amount: String,
    pub policy_json: String,
    pub created_at: Option<i64>,
}

/// A persisted ladder row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GridRowRecord {
    pub id: Option<i64>,
    pub strategy_id: i64,
    pub row_index: i64,
    pub level_ratio: String,
    pub buy_trigger_price: String,
    pub buy_price: String,
    pub buy_amount: String,
    pub shares: String,
    pub sell_price: String,
}

/// Repository for strategies and grid rows
pub struct StrategyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StrategyRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a strategy with its rows. Keyed by `content_hash`: saving the same
    /// content twice returns the existing id and leaves the rows untouched.
    ///
    /// Returns `(id, inserted)`.
    pub async fn save(
        &self,
        record: &StrategyRecord,
        rows: &[GridRowRecord],
    ) -> DbResult<(i64, bool)> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO strategies (
                content_hash, name, a, b, first_trigger_price,
                total_rows, buy_amount, policy_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.content_hash)
        .bind(&record.name)
        .bind(&record.a)
        .bind(&record.b)
        .bind(&record.first_trigger_price)
        .bind(record.total_rows)
        .bind(&record.buy_amount)
        .bind(&record.policy_json)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let (id,): (i64,) = sqlx::query_as("SELECT id FROM strategies WHERE content_hash = ?")
                .bind(&record.content_hash)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok((id, false));
        }

        let id = result.last_insert_rowid();
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO grid_rows (
                    strategy_id, row_index, level_ratio, buy_trigger_price,
                    buy_price, buy_amount, shares, sell_price
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(row.row_index)
            .bind(&row.level_ratio)
            .bind(&row.buy_trigger_price)
            .bind(&row.buy_price)
            .bind(&row.buy_amount)
            .bind(&row.shares)
            .bind(&row.sell_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((id, true))
    }

    /// Get a strategy header by id
    pub async fn get(&self, id: i64) -> DbResult<Option<StrategyRecord>> {
        let record = sqlx::query_as::<_, StrategyRecord>(
            r#"
            SELECT id, content_hash, name, a, b, first_trigger_price,
                   total_rows, buy_amount, policy_json, created_at
            FROM strategies
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Get the rows of a strategy ordered by index
    pub async fn get_rows(&self, strategy_id: i64) -> DbResult<Vec<GridRowRecord>> {
        let rows = sqlx::query_as::<_, GridRowRecord>(
            r#"
            SELECT id, strategy_id, row_index, level_ratio, buy_trigger_price,
                   buy_price, buy_amount, shares, sell_price
            FROM grid_rows
            WHERE strategy_id = ?
            ORDER BY row_index ASC
            "#,
        )
        .bind(strategy_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// List all strategy headers, oldest first
    pub async fn list(&self) -> DbResult<Vec<StrategyRecord>> {
        let records = sqlx::query_as::<_, StrategyRecord>(
            r#"
            SELECT id, content_hash, name, a, b, first_trigger_price,
                   total_rows, buy_amount, policy_json, created_at
            FROM strategies
            ORDER BY id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Delete a strategy with its rows and backtest runs.
    /// Returns false when no strategy had that id.
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backtest_runs WHERE strategy_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM grid_rows WHERE strategy_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM strategies WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
