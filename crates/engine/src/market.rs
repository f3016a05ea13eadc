//! Market data providers
//!
//! The simulator never fetches data itself. Callers obtain bars from a
//! [`MarketDataProvider`] first, then hand them over.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use persistence::repository::{MarketBarRecord, MarketRepository};
use persistence::SqlitePool;
use rust_decimal::Decimal;

use crate::error::{GridError, GridResult};
use crate::types::OhlcBar;

/// Source of ordered daily bars
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Bars for `code` in `[start, end]` (inclusive, open bounds when `None`),
    /// ascending by date
    async fn get_ohlc(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> GridResult<Vec<OhlcBar>>;
}

/// Check ordering and OHLC invariants of a series
pub fn validate_series(bars: &[OhlcBar]) -> GridResult<()> {
    let mut previous: Option<NaiveDate> = None;
    for bar in bars {
        if let Some(prev) = previous {
            if bar.date <= prev {
                return Err(GridError::InvalidBars {
                    date: bar.date,
                    reason: format!("not after previous bar {prev}"),
                });
            }
        }
        if bar.low > bar.high {
            return Err(GridError::InvalidBars {
                date: bar.date,
                reason: format!("low {} above high {}", bar.low, bar.high),
            });
        }
        for (label, value) in [("open", bar.open), ("close", bar.close)] {
            if value < bar.low || value > bar.high {
                return Err(GridError::InvalidBars {
                    date: bar.date,
                    reason: format!("{label} {value} outside [{}, {}]", bar.low, bar.high),
                });
            }
        }
        if bar.low <= Decimal::ZERO {
            return Err(GridError::InvalidBars {
                date: bar.date,
                reason: "prices must be positive".to_string(),
            });
        }
        if bar.volume < Decimal::ZERO {
            return Err(GridError::InvalidBars {
                date: bar.date,
                reason: "negative volume".to_string(),
            });
        }
        previous = Some(bar.date);
    }
    Ok(())
}

/// Keep bars inside `[start, end]`
pub fn filter_window(
    bars: &[OhlcBar],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<OhlcBar> {
    bars.iter()
        .filter(|b| start.map_or(true, |s| b.date >= s))
        .filter(|b| end.map_or(true, |e| b.date <= e))
        .cloned()
        .collect()
}

pub(crate) fn parse_decimal(value: &str, what: &str) -> GridResult<Decimal> {
    Decimal::from_str(value).map_err(|e| GridError::Corrupt(format!("{what} '{value}': {e}")))
}

pub(crate) fn parse_date(value: &str, what: &str) -> GridResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| GridError::Corrupt(format!("{what} '{value}': {e}")))
}

pub(crate) fn bar_from_record(record: &MarketBarRecord) -> GridResult<OhlcBar> {
    Ok(OhlcBar {
        date: parse_date(&record.date, "bar date")?,
        open: parse_decimal(&record.open, "open")?,
        high: parse_decimal(&record.high, "high")?,
        low: parse_decimal(&record.low, "low")?,
        close: parse_decimal(&record.close, "close")?,
        volume: parse_decimal(&record.volume, "volume")?,
    })
}

pub(crate) fn bar_to_record(code: &str, bar: &OhlcBar) -> MarketBarRecord {
    MarketBarRecord {
        id: None,
        import_id: None,
        code: code.to_string(),
        date: bar.date.format("%Y-%m-%d").to_string(),
        open: bar.open.to_string(),
        high: bar.high.to_string(),
        low: bar.low.to_string(),
        close: bar.close.to_string(),
        volume: bar.volume.to_string(),
    }
}

/// Bars imported into the local database
#[derive(Clone)]
pub struct SqliteMarketData {
    pool: SqlitePool,
}

impl SqliteMarketData {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketDataProvider for SqliteMarketData {
    async fn get_ohlc(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> GridResult<Vec<OhlcBar>> {
        let start = start.map(|d| d.format("%Y-%m-%d").to_string());
        let end = end.map(|d| d.format("%Y-%m-%d").to_string());

        let records = MarketRepository::new(&self.pool)
            .get_bars(code, start.as_deref(), end.as_deref())
            .await?;

        records.iter().map(bar_from_record).collect()
    }
}

/// Fixed series held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    series: BTreeMap<String, Vec<OhlcBar>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the series of an instrument
    pub fn insert(&mut self, code: impl Into<String>, mut bars: Vec<OhlcBar>) {
        bars.sort_by_key(|b| b.date);
        self.series.insert(code.into(), bars);
    }

    pub fn with_series(mut self, code: impl Into<String>, bars: Vec<OhlcBar>) -> Self {
        self.insert(code, bars);
        self
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryMarketData {
    async fn get_ohlc(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> GridResult<Vec<OhlcBar>> {
        Ok(self
            .series
            .get(code)
            .map(|bars| filter_window(bars, start, end))
            .unwrap_or_default())
    }
}
