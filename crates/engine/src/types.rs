//! Types for the grid strategy engine

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decay::DecayModel;

/// Prices on the ladder are kept at this many decimal places
pub const PRICE_SCALE: u32 = 4;
/// Minimum tradable lot (shares are whole multiples of this)
pub const DEFAULT_LOT_SIZE: u32 = 100;
/// Sell target above the buy price, as a fraction (0.05 = +5%)
pub const DEFAULT_PROFIT_MARGIN: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
/// Buy price offset below the trigger; zero means buy at the trigger
pub const DEFAULT_SLIPPAGE: Decimal = Decimal::ZERO;

/// Ladder construction policy. Part of the config so a strategy can always be
/// regenerated from its config alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridPolicy {
    pub decay: DecayModel,
    pub slippage: Decimal,
    pub profit_margin: Decimal,
    pub lot_size: u32,
    /// A sold row re-arms and can buy again on the next drop
    pub reentrant: bool,
}

impl Default for GridPolicy {
    fn default() -> Self {
        Self {
            decay: DecayModel::default(),
            slippage: DEFAULT_SLIPPAGE,
            profit_margin: DEFAULT_PROFIT_MARGIN,
            lot_size: DEFAULT_LOT_SIZE,
            reentrant: true,
        }
    }
}

/// Parameters a strategy is generated from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub a: Decimal,
    pub b: Decimal,
    pub first_trigger_price: Decimal,
    pub total_rows: u32,
    /// Currency committed per grid level
    pub buy_amount: Decimal,
    #[serde(default)]
    pub policy: GridPolicy,
}

/// One rung of the price ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub index: u32,
    /// buy_trigger_price / first_trigger_price
    pub level_ratio: Decimal,
    pub buy_trigger_price: Decimal,
    pub buy_price: Decimal,
    pub buy_amount: Decimal,
    pub shares: Decimal,
    pub sell_price: Decimal,
}

/// A generated strategy. `id` is only set once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub id: Option<i64>,
    pub config: StrategyConfig,
    pub rows: Vec<GridRow>,
}

impl Strategy {
    /// Cash needed to fill every row at its buy price
    pub fn total_capital(&self) -> Decimal {
        self.rows.iter().map(|r| r.buy_price * r.shares).sum()
    }
}

/// A daily bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

/// How fills are priced when a bar opens beyond a level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Gap through a level fills at the open (buys at min(open, level),
    /// sells at max(open, level))
    #[default]
    GapAware,
    /// Always fill at the row's own price
    LevelPrice,
}

impl std::fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillPolicy::GapAware => write!(f, "gap_aware"),
            FillPolicy::LevelPrice => write!(f, "level_price"),
        }
    }
}

impl std::str::FromStr for FillPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gap_aware" => Ok(FillPolicy::GapAware),
            "level_price" => Ok(FillPolicy::LevelPrice),
            other => Err(format!("unknown fill policy '{other}'")),
        }
    }
}

/// Per-run simulation inputs besides the strategy and bars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOptions {
    pub initial_cash: Decimal,
    #[serde(default)]
    pub fill_policy: FillPolicy,
}

/// Per-row state during a simulation
#[derive(Debug, Clone, PartialEq)]
pub enum RowState {
    Armed,
    Holding {
        fill_date: NaiveDate,
        fill_price: Decimal,
    },
    Sold,
}

/// Side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// A fill in the trade log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub action: TradeAction,
    pub row_index: u32,
    pub executed_price: Decimal,
    pub shares: Decimal,
    /// executed_price × shares, never negative
    pub amount: Decimal,
    pub cash_after: Decimal,
}

impl Trade {
    /// Signed effect on cash: buys debit, sells credit
    pub fn cash_delta(&self) -> Decimal {
        match self.action {
            TradeAction::Buy => -self.amount,
            TradeAction::Sell => self.amount,
        }
    }
}

/// A buy trigger that could not be funded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTrigger {
    pub date: NaiveDate,
    pub row_index: u32,
    pub trigger_price: Decimal,
    pub required: Decimal,
    pub available: Decimal,
}

/// A point on the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub total_value: Decimal,
}

/// Performance summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub initial_cash: Decimal,
    pub final_value: Decimal,
    /// last.total_value / first.total_value − 1
    pub total_return: Decimal,
    /// final_value / initial_cash − 1
    pub simple_return: Decimal,
    pub annualized_return: Decimal,
    /// Largest peak-to-trough decline as a fraction of the peak
    pub max_drawdown: Decimal,
    pub max_drawdown_amount: Decimal,
    /// Worst (value − initial_cash) / initial_cash, never positive
    pub max_drawdown_vs_initial: Decimal,
    pub max_capital_used: Decimal,
    pub annualized_volatility: Decimal,
    pub sharpe_ratio: Decimal,
    pub trade_count: u32,
    pub buy_count: u32,
    pub sell_count: u32,
    pub skipped_trigger_count: u32,
    pub triggered_rows: u32,
    pub round_trips: u32,
    pub winning_round_trips: u32,
    pub win_rate: Decimal,
    pub realized_pnl: Decimal,
    pub open_positions: u32,
}

/// Result of one simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: Option<i64>,
    pub strategy_id: Option<i64>,
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: Decimal,
    pub fill_policy: FillPolicy,
    pub daily_equity: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub skipped_triggers: Vec<SkippedTrigger>,
    pub metrics: BacktestMetrics,
}

/// Listing entry for persisted runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub id: i64,
    pub strategy_id: i64,
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: Decimal,
    pub total_return: Decimal,
    pub max_drawdown: Decimal,
    pub trade_count: u32,
}

/// Listing entry for saved strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySummary {
    pub id: i64,
    pub name: Option<String>,
    pub a: Decimal,
    pub b: Decimal,
    pub first_trigger_price: Decimal,
    pub total_rows: u32,
    pub buy_amount: Decimal,
    pub created_at: Option<i64>,
}

/// Instrument with imported bars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub latest_date: NaiveDate,
    pub latest: Decimal,
    /// Percent change of the latest close over the previous one
    pub change_pct: Decimal,
    pub bar_count: i64,
}

/// Outcome of importing bars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub import_id: i64,
    pub code: String,
    pub record_count: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

/// Import batch listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketImport {
    pub id: i64,
    pub file_name: Option<String>,
    pub code: String,
    pub record_count: i64,
    pub date_range: Option<String>,
    pub imported_at: Option<i64>,
}
