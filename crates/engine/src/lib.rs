//! Grid Lab Engine - grid strategy generation and backtesting
//!
//! Provides:
//! - Price-ladder generator with pluggable decay functions
//! - Deterministic bar-by-bar grid simulator
//! - Performance metrics (returns, drawdown, Sharpe, round-trip win rate)
//! - Market data providers (local SQLite, in-memory, remote HTTP)
//! - `GridService` facade with persistence and in-flight run sharing

pub mod api;
pub mod decay;
pub mod error;
pub mod grid;
pub mod market;
pub mod metrics;
pub mod service;
pub mod simulator;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use api::RemoteMarketData;
pub use decay::{DecayFunction, DecayModel};
pub use error::{GridError, GridResult};
pub use grid::{generate, generate_with, validate_config, MAX_ROWS};
pub use market::{InMemoryMarketData, MarketDataProvider, SqliteMarketData};
pub use metrics::compute_metrics;
pub use service::{GridService, RunBacktestRequest};
pub use simulator::GridSimulator;
pub use store::BacktestFingerprint;
pub use types::*;
