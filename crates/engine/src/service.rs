//! Grid service: the facade the CLI and HTTP layer call into
//!
//! Wires the generator, the simulator and the market data provider to the
//! persistence repositories. Identical backtests that overlap in time share a
//! single simulation and a single stored run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use persistence::repository::{BacktestRepository, MarketRepository, StrategyRepository};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{GridError, GridResult};
use crate::grid;
use crate::market::{bar_to_record, validate_series, MarketDataProvider, SqliteMarketData};
use crate::simulator::GridSimulator;
use crate::store::{self, BacktestFingerprint};
use crate::types::*;

/// Parameters of a backtest request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBacktestRequest {
    pub strategy_id: i64,
    pub code: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub initial_cash: Decimal,
    #[serde(default)]
    pub fill_policy: Option<FillPolicy>,
}

type InflightRuns = Mutex<HashMap<BacktestFingerprint, Arc<OnceCell<BacktestRun>>>>;

/// Strategy, backtest and market data operations over one database
#[derive(Clone)]
pub struct GridService {
    pool: SqlitePool,
    market: Arc<dyn MarketDataProvider>,
    inflight: Arc<InflightRuns>,
}

fn check_window(start: Option<NaiveDate>, end: Option<NaiveDate>) -> GridResult<()> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(GridError::InvalidRequest(format!(
                "start_date {s} is after end_date {e}"
            )));
        }
    }
    Ok(())
}

impl GridService {
    pub fn new(pool: SqlitePool, market: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            pool,
            market,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Service reading bars from the same database
    pub fn with_local_data(pool: SqlitePool) -> Self {
        let market = Arc::new(SqliteMarketData::new(pool.clone()));
        Self::new(pool, market)
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    pub fn generate(&self, config: &StrategyConfig) -> GridResult<Strategy> {
        grid::generate(config)
    }

    /// Persist a strategy. The rows must be exactly what its config generates;
    /// saving identical content again returns the existing id.
    pub async fn save(&self, strategy: &Strategy) -> GridResult<i64> {
        let expected = grid::generate(&strategy.config)?;
        if !store::rows_match(&strategy.rows, &expected.rows) {
            return Err(GridError::invalid_config(
                "rows",
                "rows do not match the ladder generated from the config",
            ));
        }

        let hash = store::content_hash(strategy)?;
        let (record, rows) = store::strategy_to_records(strategy, hash)?;
        let (id, inserted) = StrategyRepository::new(&self.pool)
            .save(&record, &rows)
            .await?;

        if inserted {
            info!(id, rows = rows.len(), "Saved strategy");
        } else {
            debug!(id, "Strategy already saved");
        }
        Ok(id)
    }

    pub async fn list_strategies(&self) -> GridResult<Vec<StrategySummary>> {
        let records = StrategyRepository::new(&self.pool).list().await?;
        records
            .iter()
            .map(store::strategy_summary_from_record)
            .collect()
    }

    pub async fn get_strategy(&self, id: i64) -> GridResult<Strategy> {
        let repo = StrategyRepository::new(&self.pool);
        let record = repo.get(id).await?.ok_or(GridError::NotFound {
            entity: "strategy",
            id,
        })?;
        let rows = repo.get_rows(id).await?;
        store::strategy_from_records(&record, &rows)
    }

    /// Rows of a saved strategy, index ascending
    pub async fn get_strategy_rows(&self, id: i64) -> GridResult<Vec<GridRow>> {
        Ok(self.get_strategy(id).await?.rows)
    }

    /// Delete a strategy together with its rows and backtests
    pub async fn delete_strategy(&self, id: i64) -> GridResult<()> {
        if !StrategyRepository::new(&self.pool).delete(id).await? {
            return Err(GridError::NotFound {
                entity: "strategy",
                id,
            });
        }
        info!(id, "Deleted strategy");
        Ok(())
    }

    // ========================================================================
    // Backtests
    // ========================================================================

    /// Run (or join an identical in-flight run of) a backtest and persist it
    pub async fn run_backtest(&self, request: &RunBacktestRequest) -> GridResult<BacktestRun> {
        if request.initial_cash <= Decimal::ZERO {
            return Err(GridError::InvalidRequest(format!(
                "initial_cash must be positive, got {}",
                request.initial_cash
            )));
        }
        if request.code.trim().is_empty() {
            return Err(GridError::InvalidRequest("code is required".to_string()));
        }
        check_window(request.start_date, request.end_date)?;

        let fingerprint = BacktestFingerprint::new(
            request.strategy_id,
            request.code.trim(),
            request.start_date,
            request.end_date,
            request.initial_cash,
            request.fill_policy.unwrap_or_default(),
        );

        let cell = {
            let mut inflight = self.inflight.lock().await;
            let cell = inflight
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(cell)
        };

        let result = cell
            .get_or_try_init(|| self.execute_backtest(&fingerprint))
            .await
            .cloned();

        {
            let mut inflight = self.inflight.lock().await;
            if inflight
                .get(&fingerprint)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                inflight.remove(&fingerprint);
            }
        }

        result
    }

    async fn execute_backtest(&self, fingerprint: &BacktestFingerprint) -> GridResult<BacktestRun> {
        let strategy = self.get_strategy(fingerprint.strategy_id).await?;
        let bars = self
            .market
            .get_ohlc(&fingerprint.code, fingerprint.start_date, fingerprint.end_date)
            .await?;

        let options = SimulationOptions {
            initial_cash: fingerprint.initial_cash,
            fill_policy: fingerprint.fill_policy,
        };
        let mut run = GridSimulator::run(
            &strategy,
            &fingerprint.code,
            &bars,
            fingerprint.start_date,
            fingerprint.end_date,
            &options,
        )?;

        let record = store::run_to_record(&run, fingerprint.strategy_id, fingerprint)?;
        let id = BacktestRepository::new(&self.pool).save(&record).await?;
        run.id = Some(id);

        info!(
            id,
            strategy_id = fingerprint.strategy_id,
            code = %fingerprint.code,
            "Saved backtest run"
        );
        Ok(run)
    }

    pub async fn get_backtest(&self, id: i64) -> GridResult<BacktestRun> {
        let record = BacktestRepository::new(&self.pool)
            .get(id)
            .await?
            .ok_or(GridError::NotFound {
                entity: "backtest",
                id,
            })?;
        store::run_from_record(&record)
    }

    pub async fn list_backtests(&self, strategy_id: Option<i64>) -> GridResult<Vec<BacktestSummary>> {
        let records = BacktestRepository::new(&self.pool).list(strategy_id).await?;
        records
            .iter()
            .map(store::backtest_summary_from_record)
            .collect()
    }

    // ========================================================================
    // Market data
    // ========================================================================

    pub async fn get_ohlc(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> GridResult<Vec<OhlcBar>> {
        check_window(start, end)?;
        self.market.get_ohlc(code, start, end).await
    }

    /// Import bars for one instrument as a new batch. Bars may arrive in any
    /// order; duplicates or malformed bars reject the whole batch.
    pub async fn import_bars(
        &self,
        file_name: Option<&str>,
        code: &str,
        mut bars: Vec<OhlcBar>,
    ) -> GridResult<ImportSummary> {
        let code = code.trim();
        if code.is_empty() {
            return Err(GridError::InvalidRequest("code is required".to_string()));
        }
        bars.sort_by_key(|b| b.date);
        validate_series(&bars)?;

        let (first_date, last_date) = match (bars.first(), bars.last()) {
            (Some(f), Some(l)) => (f.date, l.date),
            _ => {
                return Err(GridError::InvalidRequest(format!(
                    "no bars to import for {code}"
                )))
            }
        };

        let date_range = format!("{first_date} ~ {last_date}");
        let records: Vec<_> = bars.iter().map(|b| bar_to_record(code, b)).collect();
        let import_id = MarketRepository::new(&self.pool)
            .import_bars(file_name, code, Some(&date_range), &records)
            .await?;

        info!(import_id, code, bars = bars.len(), range = %date_range, "Imported bars");
        Ok(ImportSummary {
            import_id,
            code: code.to_string(),
            record_count: bars.len(),
            first_date,
            last_date,
        })
    }

    pub async fn list_imports(&self) -> GridResult<Vec<MarketImport>> {
        let records = MarketRepository::new(&self.pool).list_imports().await?;
        Ok(records.iter().map(store::import_from_record).collect())
    }

    pub async fn delete_import(&self, id: i64) -> GridResult<()> {
        if !MarketRepository::new(&self.pool).delete_import(id).await? {
            return Err(GridError::NotFound { entity: "import", id });
        }
        info!(id, "Deleted import batch");
        Ok(())
    }

    /// Instruments with imported bars, with latest close and change percent.
    /// An instrument whose stored values no longer parse is left out.
    pub async fn list_instruments(&self) -> GridResult<Vec<Instrument>> {
        let records = MarketRepository::new(&self.pool).list_instruments().await?;
        let mut instruments = Vec::with_capacity(records.len());
        for record in &records {
            match store::instrument_from_record(record) {
                Ok(instrument) => instruments.push(instrument),
                Err(e) => warn!(code = %record.code, error = %e, "Skipping instrument"),
            }
        }
        Ok(instruments)
    }
}
