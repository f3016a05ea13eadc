//! Repository implementations for database operations

pub mod backtest;
pub mod market;
pub mod strategy;

pub use backtest::*;
pub use market::*;
pub use strategy::*;
