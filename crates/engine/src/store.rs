//! Conversions between engine types and persistence records

use chrono::NaiveDate;
use persistence::repository::{
    BacktestRunRecord, BacktestSummaryRecord, GridRowRecord, InstrumentRecord,
    MarketImportRecord, StrategyRecord,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{GridError, GridResult};
use crate::market::{parse_date, parse_decimal};
use crate::types::*;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Strategies
// ============================================================================

#[derive(Serialize)]
struct CanonicalStrategy {
    config: StrategyConfig,
    rows: Vec<GridRow>,
}

fn normalize_config(config: &StrategyConfig) -> StrategyConfig {
    let mut c = config.clone();
    c.a = c.a.normalize();
    c.b = c.b.normalize();
    c.first_trigger_price = c.first_trigger_price.normalize();
    c.buy_amount = c.buy_amount.normalize();
    c.policy.slippage = c.policy.slippage.normalize();
    c.policy.profit_margin = c.policy.profit_margin.normalize();
    c
}

fn normalize_row(row: &GridRow) -> GridRow {
    GridRow {
        index: row.index,
        level_ratio: row.level_ratio.normalize(),
        buy_trigger_price: row.buy_trigger_price.normalize(),
        buy_price: row.buy_price.normalize(),
        buy_amount: row.buy_amount.normalize(),
        shares: row.shares.normalize(),
        sell_price: row.sell_price.normalize(),
    }
}

/// SHA-256 over the canonical JSON of config and rows. `10` and `10.0` hash
/// the same; the database id does not take part.
pub fn content_hash(strategy: &Strategy) -> GridResult<String> {
    let canonical = CanonicalStrategy {
        config: normalize_config(&strategy.config),
        rows: strategy.rows.iter().map(normalize_row).collect(),
    };
    let json = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(&json))
}

/// Rows compared on value, ignoring decimal scale
pub fn rows_match(left: &[GridRow], right: &[GridRow]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(l, r)| normalize_row(l) == normalize_row(r))
}

pub fn strategy_to_records(
    strategy: &Strategy,
    hash: String,
) -> GridResult<(StrategyRecord, Vec<GridRowRecord>)> {
    let config = &strategy.config;
    let record = StrategyRecord {
        id: strategy.id,
        content_hash: hash,
        name: config.name.clone(),
        a: config.a.to_string(),
        b: config.b.to_string(),
        first_trigger_price: config.first_trigger_price.to_string(),
        total_rows: config.total_rows as i64,
        buy_amount: config.buy_amount.to_string(),
        policy_json: serde_json::to_string(&config.policy)?,
        created_at: None,
    };

    let rows = strategy
        .rows
        .iter()
        .map(|row| GridRowRecord {
            id: None,
            strategy_id: strategy.id.unwrap_or_default(),
            row_index: row.index as i64,
            level_ratio: row.level_ratio.to_string(),
            buy_trigger_price: row.buy_trigger_price.to_string(),
            buy_price: row.buy_price.to_string(),
            buy_amount: row.buy_amount.to_string(),
            shares: row.shares.to_string(),
            sell_price: row.sell_price.to_string(),
        })
        .collect();

    Ok((record, rows))
}

fn config_from_record(record: &StrategyRecord) -> GridResult<StrategyConfig> {
    Ok(StrategyConfig {
        name: record.name.clone(),
        a: parse_decimal(&record.a, "a")?,
        b: parse_decimal(&record.b, "b")?,
        first_trigger_price: parse_decimal(&record.first_trigger_price, "first_trigger_price")?,
        total_rows: u32::try_from(record.total_rows)
            .map_err(|_| GridError::Corrupt(format!("total_rows {}", record.total_rows)))?,
        buy_amount: parse_decimal(&record.buy_amount, "buy_amount")?,
        policy: serde_json::from_str(&record.policy_json)?,
    })
}

pub fn row_from_record(record: &GridRowRecord) -> GridResult<GridRow> {
    Ok(GridRow {
        index: u32::try_from(record.row_index)
            .map_err(|_| GridError::Corrupt(format!("row_index {}", record.row_index)))?,
        level_ratio: parse_decimal(&record.level_ratio, "level_ratio")?,
        buy_trigger_price: parse_decimal(&record.buy_trigger_price, "buy_trigger_price")?,
        buy_price: parse_decimal(&record.buy_price, "buy_price")?,
        buy_amount: parse_decimal(&record.buy_amount, "buy_amount")?,
        shares: parse_decimal(&record.shares, "shares")?,
        sell_price: parse_decimal(&record.sell_price, "sell_price")?,
    })
}

pub fn strategy_from_records(
    record: &StrategyRecord,
    rows: &[GridRowRecord],
) -> GridResult<Strategy> {
    Ok(Strategy {
        id: record.id,
        config: config_from_record(record)?,
        rows: rows.iter().map(row_from_record).collect::<GridResult<_>>()?,
    })
}

pub fn strategy_summary_from_record(record: &StrategyRecord) -> GridResult<StrategySummary> {
    let config = config_from_record(record)?;
    Ok(StrategySummary {
        id: record.id.unwrap_or_default(),
        name: config.name,
        a: config.a,
        b: config.b,
        first_trigger_price: config.first_trigger_price,
        total_rows: config.total_rows,
        buy_amount: config.buy_amount,
        created_at: record.created_at,
    })
}

// ============================================================================
// Backtests
// ============================================================================

/// Identity of a backtest request. Two requests with the same fingerprint
/// produce the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BacktestFingerprint {
    pub strategy_id: i64,
    pub code: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Normalized so `1000` and `1000.00` coincide
    pub initial_cash: Decimal,
    pub fill_policy: FillPolicy,
}

impl BacktestFingerprint {
    pub fn new(
        strategy_id: i64,
        code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        initial_cash: Decimal,
        fill_policy: FillPolicy,
    ) -> Self {
        Self {
            strategy_id,
            code: code.to_string(),
            start_date,
            end_date,
            initial_cash: initial_cash.normalize(),
            fill_policy,
        }
    }

    /// Hex digest stored alongside the run
    pub fn digest(&self) -> String {
        let bound = |d: Option<NaiveDate>| d.map(format_date).unwrap_or_else(|| "*".to_string());
        let key = format!(
            "{}|{}|{}|{}|{}|{}",
            self.strategy_id,
            self.code,
            bound(self.start_date),
            bound(self.end_date),
            self.initial_cash,
            self.fill_policy
        );
        sha256_hex(key.as_bytes())
    }
}

pub fn run_to_record(
    run: &BacktestRun,
    strategy_id: i64,
    fingerprint: &BacktestFingerprint,
) -> GridResult<BacktestRunRecord> {
    Ok(BacktestRunRecord {
        id: run.id,
        strategy_id,
        fingerprint: fingerprint.digest(),
        code: run.code.clone(),
        start_date: format_date(run.start_date),
        end_date: format_date(run.end_date),
        initial_cash: run.initial_cash.to_string(),
        fill_policy: run.fill_policy.to_string(),
        equity_json: serde_json::to_string(&run.daily_equity)?,
        trades_json: serde_json::to_string(&run.trades)?,
        skipped_json: serde_json::to_string(&run.skipped_triggers)?,
        metrics_json: serde_json::to_string(&run.metrics)?,
        total_return: run.metrics.total_return.to_string(),
        max_drawdown: run.metrics.max_drawdown.to_string(),
        trade_count: run.metrics.trade_count as i64,
        created_at: None,
    })
}

fn parse_fill_policy(value: &str) -> GridResult<FillPolicy> {
    value.parse().map_err(GridError::Corrupt)
}

pub fn run_from_record(record: &BacktestRunRecord) -> GridResult<BacktestRun> {
    Ok(BacktestRun {
        id: record.id,
        strategy_id: Some(record.strategy_id),
        code: record.code.clone(),
        start_date: parse_date(&record.start_date, "start_date")?,
        end_date: parse_date(&record.end_date, "end_date")?,
        initial_cash: parse_decimal(&record.initial_cash, "initial_cash")?,
        fill_policy: parse_fill_policy(&record.fill_policy)?,
        daily_equity: serde_json::from_str(&record.equity_json)?,
        trades: serde_json::from_str(&record.trades_json)?,
        skipped_triggers: serde_json::from_str(&record.skipped_json)?,
        metrics: serde_json::from_str(&record.metrics_json)?,
    })
}

pub fn backtest_summary_from_record(record: &BacktestSummaryRecord) -> GridResult<BacktestSummary> {
    Ok(BacktestSummary {
        id: record.id,
        strategy_id: record.strategy_id,
        code: record.code.clone(),
        start_date: parse_date(&record.start_date, "start_date")?,
        end_date: parse_date(&record.end_date, "end_date")?,
        initial_cash: parse_decimal(&record.initial_cash, "initial_cash")?,
        total_return: parse_decimal(&record.total_return, "total_return")?,
        max_drawdown: parse_decimal(&record.max_drawdown, "max_drawdown")?,
        trade_count: u32::try_from(record.trade_count).unwrap_or_default(),
    })
}

// ============================================================================
// Market data
// ============================================================================

pub fn import_from_record(record: &MarketImportRecord) -> MarketImport {
    MarketImport {
        id: record.id.unwrap_or_default(),
        file_name: record.file_name.clone(),
        code: record.code.clone(),
        record_count: record.record_count,
        date_range: record.date_range.clone(),
        imported_at: record.imported_at,
    }
}

/// Percent change of the latest close over the previous one, 2 dp
pub fn instrument_from_record(record: &InstrumentRecord) -> GridResult<Instrument> {
    let latest = parse_decimal(&record.latest_close, "latest_close")?;
    let change_pct = match record.previous_close.as_deref() {
        Some(prev) => {
            let prev = parse_decimal(prev, "previous_close")?;
            if prev.is_zero() {
                Decimal::ZERO
            } else {
                ((latest - prev) / prev * Decimal::ONE_HUNDRED).round_dp(2)
            }
        }
        None => Decimal::ZERO,
    };

    Ok(Instrument {
        code: record.code.clone(),
        latest_date: parse_date(&record.latest_date, "latest_date")?,
        latest,
        change_pct,
        bar_count: record.bar_count,
    })
}
