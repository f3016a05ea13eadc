//! Backtest repository - completed simulation runs

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A completed backtest run. Equity curve, trades, skipped triggers and
/// metrics are stored as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BacktestRunRecord {
    pub id: Option<i64>,
    pub strategy_id: i64,
    pub fingerprint: String,
    pub code: String,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: String,
    pub fill_policy: String,
    pub equity_json: String,
    pub trades_json: String,
    pub skipped_json: String,
    pub metrics_json: String,
    pub total_return: String,
    pub max_drawdown: String,
    pub trade_count: i64,
    pub created_at: Option<i64>,
}

/// Lightweight listing row (no JSON payloads)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BacktestSummaryRecord {
    pub id: i64,
    pub strategy_id: i64,
    pub code: String,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: String,
    pub total_return: String,
    pub max_drawdown: String,
    pub trade_count: i64,
    pub created_at: Option<i64>,
}

/// Repository for backtest runs
pub struct BacktestRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BacktestRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a run and return its id
    pub async fn save(&self, record: &BacktestRunRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO backtest_runs (
                strategy_id, fingerprint, code, start_date, end_date,
                initial_cash, fill_policy,
                equity_json, trades_json, skipped_json, metrics_json,
                total_return, max_drawdown, trade_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.strategy_id)
        .bind(&record.fingerprint)
        .bind(&record.code)
        .bind(&record.start_date)
        .bind(&record.end_date)
        .bind(&record.initial_cash)
        .bind(&record.fill_policy)
        .bind(&record.equity_json)
        .bind(&record.trades_json)
        .bind(&record.skipped_json)
        .bind(&record.metrics_json)
        .bind(&record.total_return)
        .bind(&record.max_drawdown)
        .bind(record.trade_count)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a run by id
    pub async fn get(&self, id: i64) -> DbResult<Option<BacktestRunRecord>> {
        let record = sqlx::query_as::<_, BacktestRunRecord>(
            r#"
            SELECT id, strategy_id, fingerprint, code, start_date, end_date,
                   initial_cash, fill_policy,
                   equity_json, trades_json, skipped_json, metrics_json,
                   total_return, max_drawdown, trade_count, created_at
            FROM backtest_runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Count runs sharing a fingerprint
    pub async fn count_by_fingerprint(&self, fingerprint: &str) -> DbResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM backtest_runs WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_one(self.pool)
                .await?;

        Ok(row.0)
    }

    /// List runs, newest first, optionally for one strategy
    pub async fn list(&self, strategy_id: Option<i64>) -> DbResult<Vec<BacktestSummaryRecord>> {
        let mut sql = String::from(
            r#"
            SELECT id, strategy_id, code, start_date, end_date, initial_cash,
                   total_return, max_drawdown, trade_count, created_at
            FROM backtest_runs
            WHERE 1=1
            "#,
        );
        if strategy_id.is_some() {
            sql.push_str(" AND strategy_id = ?");
        }
        sql.push_str(" ORDER BY id DESC");

        let mut query = sqlx::query_as::<_, BacktestSummaryRecord>(&sql);
        if let Some(id) = strategy_id {
            query = query.bind(id);
        }

        let records = query.fetch_all(self.pool).await?;
        Ok(records)
    }
}
