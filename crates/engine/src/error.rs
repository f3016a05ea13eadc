//! Engine error types

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    /// Malformed or non-monotonic strategy parameters
    #[error("invalid config: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Bars violating ordering or OHLC invariants
    #[error("invalid bar on {date}: {reason}")]
    InvalidBars { date: NaiveDate, reason: String },

    /// No bars for the requested window
    #[error("no market data for {code} in window {start:?} ~ {end:?}")]
    InsufficientData {
        code: String,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Metrics requested over an empty equity curve
    #[error("equity series is empty")]
    EmptySeries,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("market data error: {0}")]
    Market(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] persistence::DbError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl GridError {
    pub fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        GridError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type GridResult<T> = Result<T, GridError>;
