//! Performance metrics over a completed run

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{GridError, GridResult};
use crate::types::{BacktestMetrics, EquityPoint, SkippedTrigger, Trade, TradeAction};

/// Ratios are reported at this precision
const RATIO_DP: u32 = 6;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        (numerator / denominator).round_dp(RATIO_DP)
    }
}

fn from_f64(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::try_from(value)
        .map(|d| d.round_dp(RATIO_DP))
        .unwrap_or(Decimal::ZERO)
}

/// Round trips paired FIFO per row
struct RoundTripStats {
    round_trips: u32,
    winning: u32,
    realized_pnl: Decimal,
    open_positions: u32,
    max_capital_used: Decimal,
}

fn pair_round_trips(trades: &[Trade]) -> RoundTripStats {
    let mut open: BTreeMap<u32, VecDeque<Decimal>> = BTreeMap::new();
    let mut stats = RoundTripStats {
        round_trips: 0,
        winning: 0,
        realized_pnl: Decimal::ZERO,
        open_positions: 0,
        max_capital_used: Decimal::ZERO,
    };
    let mut capital_in_use = Decimal::ZERO;

    for trade in trades {
        match trade.action {
            TradeAction::Buy => {
                open.entry(trade.row_index).or_default().push_back(trade.amount);
                capital_in_use += trade.amount;
                stats.max_capital_used = stats.max_capital_used.max(capital_in_use);
            }
            TradeAction::Sell => {
                // A sell without an open buy on its row cannot come out of the simulator
                if let Some(cost) = open.get_mut(&trade.row_index).and_then(|q| q.pop_front()) {
                    let profit = trade.amount - cost;
                    stats.round_trips += 1;
                    if profit > Decimal::ZERO {
                        stats.winning += 1;
                    }
                    stats.realized_pnl += profit;
                    capital_in_use -= cost;
                }
            }
        }
    }

    stats.open_positions = open.values().map(|q| q.len() as u32).sum();
    stats
}

/// Largest peak-to-trough decline: (fraction of peak, amount)
fn max_drawdown(equity: &[EquityPoint]) -> (Decimal, Decimal) {
    let mut peak = Decimal::ZERO;
    let mut worst_pct = Decimal::ZERO;
    let mut worst_amount = Decimal::ZERO;

    for point in equity {
        if point.total_value > peak {
            peak = point.total_value;
        }
        let drawdown = peak - point.total_value;
        if drawdown > worst_amount {
            worst_amount = drawdown;
        }
        if peak > Decimal::ZERO {
            let pct = drawdown / peak;
            if pct > worst_pct {
                worst_pct = pct;
            }
        }
    }

    (worst_pct.round_dp(RATIO_DP), worst_amount)
}

/// Annualized volatility and Sharpe ratio of daily returns (zero risk-free rate)
fn volatility_and_sharpe(equity: &[EquityPoint]) -> (Decimal, Decimal) {
    let values: Vec<f64> = equity
        .iter()
        .filter_map(|p| p.total_value.to_f64())
        .collect();

    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();

    if returns.len() < 2 {
        return (Decimal::ZERO, Decimal::ZERO);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev < 1e-12 {
        return (Decimal::ZERO, Decimal::ZERO);
    }

    let annual_factor = TRADING_DAYS_PER_YEAR.sqrt();
    (
        from_f64(std_dev * annual_factor),
        from_f64(mean / std_dev * annual_factor),
    )
}

fn annualized_return(initial: Decimal, last: &EquityPoint, first: &EquityPoint) -> Decimal {
    let days = (last.date - first.date).num_days();
    if days <= 0 || initial <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let growth = match (last.total_value / initial).to_f64() {
        Some(g) if g > 0.0 => g,
        _ => return Decimal::ZERO,
    };
    from_f64(growth.powf(365.0 / days as f64) - 1.0)
}

/// Compute the metrics of a run from its equity curve and logs
pub fn compute_metrics(
    initial_cash: Decimal,
    equity: &[EquityPoint],
    trades: &[Trade],
    skipped: &[SkippedTrigger],
) -> GridResult<BacktestMetrics> {
    let (first, last) = match (equity.first(), equity.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(GridError::EmptySeries),
    };

    let (max_drawdown, max_drawdown_amount) = max_drawdown(equity);
    let trough = equity
        .iter()
        .map(|p| p.total_value)
        .min()
        .unwrap_or(last.total_value);
    let max_drawdown_vs_initial = ratio(trough - initial_cash, initial_cash).min(Decimal::ZERO);
    let (annualized_volatility, sharpe_ratio) = volatility_and_sharpe(equity);

    let stats = pair_round_trips(trades);
    let buy_count = trades.iter().filter(|t| t.action == TradeAction::Buy).count() as u32;
    let sell_count = trades.len() as u32 - buy_count;
    let triggered_rows = trades
        .iter()
        .filter(|t| t.action == TradeAction::Buy)
        .map(|t| t.row_index)
        .collect::<BTreeSet<_>>()
        .len() as u32;

    Ok(BacktestMetrics {
        initial_cash,
        final_value: last.total_value,
        total_return: ratio(last.total_value, first.total_value) - ratio_one(first.total_value),
        simple_return: ratio(last.total_value, initial_cash) - ratio_one(initial_cash),
        annualized_return: annualized_return(initial_cash, last, first),
        max_drawdown,
        max_drawdown_amount,
        max_drawdown_vs_initial,
        max_capital_used: stats.max_capital_used,
        annualized_volatility,
        sharpe_ratio,
        trade_count: trades.len() as u32,
        buy_count,
        sell_count,
        skipped_trigger_count: skipped.len() as u32,
        triggered_rows,
        round_trips: stats.round_trips,
        winning_round_trips: stats.winning,
        win_rate: ratio(
            Decimal::from(stats.winning),
            Decimal::from(stats.round_trips),
        ),
        realized_pnl: stats.realized_pnl,
        open_positions: stats.open_positions,
    })
}

/// 1 when the denominator is usable, so `ratio(a, b) - ratio_one(b)` is
/// `a / b - 1` and collapses to 0 on a zero denominator
fn ratio_one(denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        Decimal::ONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn point(d: u32, total: Decimal) -> EquityPoint {
        EquityPoint {
            date: day(d),
            cash: total,
            holdings_value: Decimal::ZERO,
            total_value: total,
        }
    }

    fn trade(d: u32, action: TradeAction, row: u32, price: Decimal) -> Trade {
        Trade {
            date: day(d),
            action,
            row_index: row,
            executed_price: price,
            shares: dec!(100),
            amount: price * dec!(100),
            cash_after: Decimal::ZERO,
        }
    }

    #[test]
    fn test_empty_series() {
        assert!(matches!(
            compute_metrics(dec!(1000), &[], &[], &[]),
            Err(GridError::EmptySeries)
        ));
    }

    #[test]
    fn test_return_and_drawdown_on_known_curve() {
        let equity = vec![
            point(1, dec!(100)),
            point(2, dec!(120)),
            point(3, dec!(90)),
            point(4, dec!(110)),
            point(5, dec!(95)),
        ];
        let m = compute_metrics(dec!(100), &equity, &[], &[]).unwrap();
        assert_eq!(m.total_return, dec!(-0.05));
        assert_eq!(m.simple_return, dec!(-0.05));
        // Peak 120 -> trough 90
        assert_eq!(m.max_drawdown, dec!(0.25));
        assert_eq!(m.max_drawdown_amount, dec!(30));
        assert_eq!(m.max_drawdown_vs_initial, dec!(-0.1));
        assert_eq!(m.final_value, dec!(95));
        assert!(m.annualized_volatility > Decimal::ZERO);
    }

    #[test]
    fn test_drawdown_uses_running_peak_only() {
        // The later high must not count as a peak for the earlier dip
        let equity = vec![point(1, dec!(100)), point(2, dec!(80)), point(3, dec!(200))];
        let m = compute_metrics(dec!(100), &equity, &[], &[]).unwrap();
        assert_eq!(m.max_drawdown, dec!(0.2));
        assert_eq!(m.max_drawdown_vs_initial, dec!(-0.2));
    }

    #[test]
    fn test_flat_curve_has_no_risk() {
        let equity: Vec<EquityPoint> = (1..=5).map(|d| point(d, dec!(1000))).collect();
        let m = compute_metrics(dec!(1000), &equity, &[], &[]).unwrap();
        assert_eq!(m.total_return, Decimal::ZERO);
        assert_eq!(m.max_drawdown, Decimal::ZERO);
        assert_eq!(m.max_drawdown_vs_initial, Decimal::ZERO);
        assert_eq!(m.sharpe_ratio, Decimal::ZERO);
        assert_eq!(m.annualized_volatility, Decimal::ZERO);
        assert_eq!(m.annualized_return, Decimal::ZERO);
    }

    #[test]
    fn test_fifo_round_trips_and_win_rate() {
        let trades = vec![
            trade(1, TradeAction::Buy, 0, dec!(10)),
            trade(2, TradeAction::Buy, 1, dec!(9)),
            trade(3, TradeAction::Sell, 0, dec!(10.5)),
            trade(4, TradeAction::Buy, 0, dec!(10)),
            // Gap-down style loss on row 1 cannot happen from the simulator but
            // the pairing must still count it as a losing trip
            trade(5, TradeAction::Sell, 1, dec!(8.5)),
        ];
        let equity = vec![point(1, dec!(3000)), point(5, dec!(3000))];
        let m = compute_metrics(dec!(3000), &equity, &trades, &[]).unwrap();

        assert_eq!(m.trade_count, 5);
        assert_eq!(m.buy_count, 3);
        assert_eq!(m.sell_count, 2);
        assert_eq!(m.round_trips, 2);
        assert_eq!(m.winning_round_trips, 1);
        assert_eq!(m.win_rate, dec!(0.5));
        assert_eq!(m.realized_pnl, dec!(0));
        assert_eq!(m.open_positions, 1);
        assert_eq!(m.triggered_rows, 2);
        // 1000 + 900 open before the first sell
        assert_eq!(m.max_capital_used, dec!(1900));
    }

    #[test]
    fn test_skipped_triggers_are_counted() {
        let skipped = vec![SkippedTrigger {
            date: day(1),
            row_index: 2,
            trigger_price: dec!(8.1),
            required: dec!(810),
            available: dec!(100),
        }];
        let m = compute_metrics(dec!(100), &[point(1, dec!(100))], &[], &skipped).unwrap();
        assert_eq!(m.skipped_trigger_count, 1);
        assert_eq!(m.win_rate, Decimal::ZERO);
    }

    #[test]
    fn test_annualized_return_over_a_year() {
        let start = EquityPoint {
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            ..point(1, dec!(1000))
        };
        let end = EquityPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            ..point(1, dec!(1100))
        };
        let m = compute_metrics(dec!(1000), &[start, end], &[], &[]).unwrap();
        assert_eq!(m.annualized_return, dec!(0.1));
    }
}
