//! Bar-by-bar grid backtest simulator

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::{GridError, GridResult};
use crate::market::{filter_window, validate_series};
use crate::metrics::compute_metrics;
use crate::types::*;

fn overflow(what: &str, date: NaiveDate) -> GridError {
    GridError::InvalidRequest(format!("{what} overflows on {date}"))
}

/// Simulates a grid strategy over daily bars.
///
/// Each bar is processed in three steps: buys for rows armed at the open,
/// sells for rows held at the open, then the equity point at the close. A row
/// bought during a bar is first eligible to sell on the next bar. A buy never
/// fills below the bar's low.
pub struct GridSimulator;

impl GridSimulator {
    /// Run `strategy` over the bars of `code` inside `[start, end]`
    pub fn run(
        strategy: &Strategy,
        code: &str,
        bars: &[OhlcBar],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        options: &SimulationOptions,
    ) -> GridResult<BacktestRun> {
        if options.initial_cash <= Decimal::ZERO {
            return Err(GridError::InvalidRequest(format!(
                "initial_cash must be positive, got {}",
                options.initial_cash
            )));
        }
        validate_series(bars)?;

        let window = filter_window(bars, start, end);
        let (first_date, last_date) = match (window.first(), window.last()) {
            (Some(f), Some(l)) => (f.date, l.date),
            _ => {
                return Err(GridError::InsufficientData {
                    code: code.to_string(),
                    start,
                    end,
                })
            }
        };

        info!(
            code = %code,
            bars = window.len(),
            rows = strategy.rows.len(),
            cash = %options.initial_cash,
            fill_policy = %options.fill_policy,
            "Starting grid backtest"
        );

        let reentrant = strategy.config.policy.reentrant;
        let mut states: Vec<RowState> = vec![RowState::Armed; strategy.rows.len()];
        let mut cash = options.initial_cash;

        let mut trades: Vec<Trade> = Vec::new();
        let mut skipped: Vec<SkippedTrigger> = Vec::new();
        let mut equity: Vec<EquityPoint> = Vec::with_capacity(window.len());

        for bar in &window {
            let held_at_open: Vec<bool> = states
                .iter()
                .map(|s| matches!(s, RowState::Holding { .. }))
                .collect();

            // Buys
            for (row, state) in strategy.rows.iter().zip(states.iter_mut()) {
                if *state != RowState::Armed || bar.low > row.buy_trigger_price {
                    continue;
                }

                let price = match options.fill_policy {
                    FillPolicy::GapAware if bar.open <= row.buy_trigger_price => bar.open,
                    _ => row.buy_price.max(bar.low),
                };
                let amount = price
                    .checked_mul(row.shares)
                    .ok_or_else(|| overflow("buy amount", bar.date))?;

                if amount > cash {
                    debug!(
                        date = %bar.date,
                        row = row.index,
                        required = %amount,
                        available = %cash,
                        "Skipped trigger, insufficient cash"
                    );
                    skipped.push(SkippedTrigger {
                        date: bar.date,
                        row_index: row.index,
                        trigger_price: row.buy_trigger_price,
                        required: amount,
                        available: cash,
                    });
                    continue;
                }

                cash -= amount;
                *state = RowState::Holding {
                    fill_date: bar.date,
                    fill_price: price,
                };
                debug!(date = %bar.date, row = row.index, price = %price, "Grid BUY");
                trades.push(Trade {
                    date: bar.date,
                    action: TradeAction::Buy,
                    row_index: row.index,
                    executed_price: price,
                    shares: row.shares,
                    amount,
                    cash_after: cash,
                });
            }

            // Sells, only for positions carried into this bar
            for ((row, state), held) in strategy
                .rows
                .iter()
                .zip(states.iter_mut())
                .zip(held_at_open.iter())
            {
                if !held || bar.high < row.sell_price {
                    continue;
                }

                let price = match options.fill_policy {
                    FillPolicy::GapAware => bar.open.max(row.sell_price),
                    FillPolicy::LevelPrice => row.sell_price,
                };
                let amount = price
                    .checked_mul(row.shares)
                    .ok_or_else(|| overflow("sell amount", bar.date))?;
                cash = cash
                    .checked_add(amount)
                    .ok_or_else(|| overflow("cash", bar.date))?;

                if let RowState::Holding { fill_price, .. } = state {
                    debug!(
                        date = %bar.date,
                        row = row.index,
                        price = %price,
                        pnl = %((price - *fill_price) * row.shares),
                        "Grid SELL"
                    );
                }
                *state = if reentrant { RowState::Armed } else { RowState::Sold };
                trades.push(Trade {
                    date: bar.date,
                    action: TradeAction::Sell,
                    row_index: row.index,
                    executed_price: price,
                    shares: row.shares,
                    amount,
                    cash_after: cash,
                });
            }

            let holdings_value = strategy
                .rows
                .iter()
                .zip(states.iter())
                .filter(|(_, s)| matches!(s, RowState::Holding { .. }))
                .try_fold(Decimal::ZERO, |acc, (row, _)| {
                    row.shares
                        .checked_mul(bar.close)
                        .and_then(|value| acc.checked_add(value))
                })
                .ok_or_else(|| overflow("holdings value", bar.date))?;
            let total_value = cash
                .checked_add(holdings_value)
                .ok_or_else(|| overflow("total value", bar.date))?;

            equity.push(EquityPoint {
                date: bar.date,
                cash,
                holdings_value,
                total_value,
            });
        }

        let metrics = compute_metrics(options.initial_cash, &equity, &trades, &skipped)?;

        info!(
            code = %code,
            trades = metrics.trade_count,
            skipped = metrics.skipped_trigger_count,
            total_return = %metrics.total_return,
            max_drawdown = %metrics.max_drawdown,
            final_value = %metrics.final_value,
            "Grid backtest complete"
        );

        Ok(BacktestRun {
            id: None,
            strategy_id: strategy.id,
            code: code.to_string(),
            start_date: first_date,
            end_date: last_date,
            initial_cash: options.initial_cash,
            fill_policy: options.fill_policy,
            daily_equity: equity,
            trades,
            skipped_triggers: skipped,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::generate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(d: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> OhlcBar {
        OhlcBar {
            date: day(d),
            open,
            high,
            low,
            close,
            volume: dec!(1000),
        }
    }

    /// Triggers 10 / 9 / 8.1, 100 shares each, sells 10.5 / 9.45 / 8.505
    fn ladder(reentrant: bool) -> Strategy {
        let config = StrategyConfig {
            name: None,
            a: dec!(1),
            b: dec!(10),
            first_trigger_price: dec!(10.0),
            total_rows: 3,
            buy_amount: dec!(1000),
            policy: GridPolicy {
                reentrant,
                ..GridPolicy::default()
            },
        };
        generate(&config).unwrap()
    }

    fn cash(amount: Decimal) -> SimulationOptions {
        SimulationOptions {
            initial_cash: amount,
            fill_policy: FillPolicy::GapAware,
        }
    }

    fn run(strategy: &Strategy, bars: &[OhlcBar], options: &SimulationOptions) -> BacktestRun {
        GridSimulator::run(strategy, "399971", bars, None, None, options).unwrap()
    }

    #[test]
    fn test_single_level_crossed_buys_once() {
        let strategy = ladder(true);
        let bars = vec![bar(1, dec!(10.0), dec!(10.2), dec!(9.5), dec!(10.0))];
        let result = run(&strategy, &bars, &cash(dec!(10000)));

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.action, TradeAction::Buy);
        assert_eq!(trade.row_index, 0);
        assert_eq!(trade.executed_price, dec!(10.0));
        assert_eq!(trade.amount, dec!(1000));
        assert_eq!(trade.cash_after, dec!(9000));

        let point = &result.daily_equity[0];
        assert_eq!(point.holdings_value, dec!(1000));
        assert_eq!(point.total_value, dec!(10000));
    }

    #[test]
    fn test_empty_window_is_insufficient_data() {
        let strategy = ladder(true);
        let err = GridSimulator::run(&strategy, "399971", &[], None, None, &cash(dec!(1000)))
            .unwrap_err();
        assert!(matches!(err, GridError::InsufficientData { .. }));

        let bars = vec![bar(1, dec!(10), dec!(10.2), dec!(9.5), dec!(10))];
        let err = GridSimulator::run(
            &strategy,
            "399971",
            &bars,
            Some(day(5)),
            Some(day(9)),
            &cash(dec!(1000)),
        )
        .unwrap_err();
        assert!(matches!(err, GridError::InsufficientData { .. }));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let strategy = ladder(true);
        let bars = vec![
            bar(2, dec!(10), dec!(10.2), dec!(9.5), dec!(10)),
            bar(1, dec!(10), dec!(10.2), dec!(9.5), dec!(10)),
        ];
        assert!(matches!(
            GridSimulator::run(&strategy, "399971", &bars, None, None, &cash(dec!(1000))),
            Err(GridError::InvalidBars { .. })
        ));
        assert!(matches!(
            GridSimulator::run(&strategy, "399971", &bars[..1], None, None, &cash(Decimal::ZERO)),
            Err(GridError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_gap_down_fills_at_open() {
        let strategy = ladder(true);
        // Opens below rows 0 and 1
        let bars = vec![bar(1, dec!(8.8), dec!(8.9), dec!(8.5), dec!(8.6))];

        let gap = run(&strategy, &bars, &cash(dec!(10000)));
        let prices: Vec<Decimal> = gap.trades.iter().map(|t| t.executed_price).collect();
        assert_eq!(prices, vec![dec!(8.8), dec!(8.8)]);

        let level = run(
            &strategy,
            &bars,
            &SimulationOptions {
                initial_cash: dec!(10000),
                fill_policy: FillPolicy::LevelPrice,
            },
        );
        let prices: Vec<Decimal> = level.trades.iter().map(|t| t.executed_price).collect();
        assert_eq!(prices, vec![dec!(10.0), dec!(9.0)]);
    }

    #[test]
    fn test_slippage_buy_stays_inside_bar_range() {
        let config = StrategyConfig {
            policy: GridPolicy {
                slippage: dec!(0.05),
                ..GridPolicy::default()
            },
            ..ladder(true).config
        };
        let strategy = generate(&config).unwrap();
        assert_eq!(strategy.rows[0].buy_price, dec!(9.95));

        let low = dec!(9.99);
        let high = dec!(10.3);
        let bars = vec![bar(1, dec!(10.2), high, low, dec!(10.1))];
        for fill_policy in [FillPolicy::GapAware, FillPolicy::LevelPrice] {
            let options = SimulationOptions {
                initial_cash: dec!(10000),
                fill_policy,
            };
            let result = run(&strategy, &bars, &options);
            assert_eq!(result.trades.len(), 1);
            let trade = &result.trades[0];
            assert_eq!(trade.executed_price, low);
            assert!(trade.executed_price >= low && trade.executed_price <= high);
            assert_eq!(trade.amount, dec!(999));
        }
    }

    #[test]
    fn test_cash_overflow_is_an_error() {
        let strategy = ladder(true);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(9.9), dec!(10.0)),
            bar(2, dec!(10.4), dec!(10.6), dec!(10.3), dec!(10.5)),
        ];
        let err = GridSimulator::run(&strategy, "399971", &bars, None, None, &cash(Decimal::MAX))
            .unwrap_err();
        assert!(matches!(err, GridError::InvalidRequest(_)));
    }

    #[test]
    fn test_gap_up_sells_at_open() {
        let strategy = ladder(true);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(9.9), dec!(10.0)),
            bar(2, dec!(11.0), dec!(11.2), dec!(10.9), dec!(11.0)),
        ];
        let result = run(&strategy, &bars, &cash(dec!(10000)));
        let sell = &result.trades[1];
        assert_eq!(sell.action, TradeAction::Sell);
        assert_eq!(sell.executed_price, dec!(11.0));
        assert_eq!(result.metrics.realized_pnl, dec!(100));
    }

    #[test]
    fn test_row_bought_in_bar_does_not_sell_same_bar() {
        let strategy = ladder(true);
        // Wide bar touches both the trigger and the sell price of row 0
        let bars = vec![
            bar(1, dec!(10.2), dec!(10.6), dec!(9.95), dec!(10.3)),
            bar(2, dec!(10.3), dec!(10.6), dec!(10.2), dec!(10.4)),
        ];
        let result = run(&strategy, &bars, &cash(dec!(10000)));

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].date, day(1));
        assert_eq!(result.trades[0].action, TradeAction::Buy);
        assert_eq!(result.trades[1].date, day(2));
        assert_eq!(result.trades[1].action, TradeAction::Sell);
        assert_eq!(result.trades[1].executed_price, dec!(10.5));
    }

    #[test]
    fn test_reentrant_row_cycles_again() {
        let strategy = ladder(true);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(9.9), dec!(10.0)),
            bar(2, dec!(10.4), dec!(10.6), dec!(10.3), dec!(10.5)),
            bar(3, dec!(10.1), dec!(10.2), dec!(9.9), dec!(10.0)),
            bar(4, dec!(10.4), dec!(10.6), dec!(10.3), dec!(10.5)),
        ];
        let result = run(&strategy, &bars, &cash(dec!(10000)));

        let actions: Vec<TradeAction> = result.trades.iter().map(|t| t.action).collect();
        assert_eq!(
            actions,
            vec![
                TradeAction::Buy,
                TradeAction::Sell,
                TradeAction::Buy,
                TradeAction::Sell
            ]
        );
        assert_eq!(result.metrics.round_trips, 2);
        assert_eq!(result.metrics.win_rate, dec!(1));
        assert_eq!(result.metrics.open_positions, 0);
    }

    #[test]
    fn test_non_reentrant_row_stops_after_one_cycle() {
        let strategy = ladder(false);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(9.9), dec!(10.0)),
            bar(2, dec!(10.4), dec!(10.6), dec!(10.3), dec!(10.5)),
            bar(3, dec!(10.1), dec!(10.2), dec!(9.9), dec!(10.0)),
        ];
        let result = run(&strategy, &bars, &cash(dec!(10000)));
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.daily_equity[2].holdings_value, Decimal::ZERO);
    }

    #[test]
    fn test_insufficient_cash_skips_and_keeps_row_armed() {
        // Non-reentrant so row 0 cannot soak up the cash freed on day 2
        let strategy = ladder(false);
        let bars = vec![
            bar(1, dec!(9.5), dec!(9.6), dec!(8.9), dec!(9.0)),
            // Row 0 sells, freeing cash
            bar(2, dec!(10.4), dec!(10.6), dec!(10.3), dec!(10.5)),
            // Row 1 triggers again and can now be funded
            bar(3, dec!(9.5), dec!(9.6), dec!(8.95), dec!(9.2)),
        ];
        let result = run(&strategy, &bars, &cash(dec!(1000)));

        assert_eq!(result.skipped_triggers.len(), 1);
        let skip = &result.skipped_triggers[0];
        assert_eq!(skip.date, day(1));
        assert_eq!(skip.row_index, 1);
        assert_eq!(skip.required, dec!(900));
        assert_eq!(skip.available, dec!(50));

        let row1_buys: Vec<&Trade> = result
            .trades
            .iter()
            .filter(|t| t.row_index == 1 && t.action == TradeAction::Buy)
            .collect();
        assert_eq!(row1_buys.len(), 1);
        assert_eq!(row1_buys[0].date, day(3));
        assert_eq!(result.metrics.skipped_trigger_count, 1);
        assert!(result.trades.iter().all(|t| t.cash_after >= Decimal::ZERO));
    }

    #[test]
    fn test_cash_is_conserved() {
        let strategy = ladder(true);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(8.0), dec!(8.2)),
            bar(2, dec!(8.3), dec!(9.5), dec!(8.2), dec!(9.4)),
            bar(3, dec!(9.4), dec!(10.6), dec!(9.3), dec!(10.5)),
            bar(4, dec!(10.4), dec!(10.5), dec!(9.7), dec!(9.8)),
        ];
        let result = run(&strategy, &bars, &cash(dec!(5000)));

        let mut expected = dec!(5000);
        let mut trades = result.trades.iter().peekable();
        for point in &result.daily_equity {
            while let Some(trade) = trades.next_if(|t| t.date == point.date) {
                expected += trade.cash_delta();
                assert_eq!(trade.cash_after, expected);
            }
            assert_eq!(point.cash, expected);
            assert_eq!(point.total_value, point.cash + point.holdings_value);
        }
    }

    #[test]
    fn test_no_look_ahead() {
        let strategy = ladder(true);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(9.9), dec!(10.0)),
            bar(2, dec!(9.8), dec!(9.9), dec!(8.9), dec!(9.0)),
            bar(3, dec!(9.2), dec!(10.6), dec!(9.1), dec!(10.5)),
            bar(4, dec!(10.4), dec!(10.5), dec!(7.0), dec!(7.5)),
        ];
        let full = run(&strategy, &bars, &cash(dec!(10000)));

        for k in 1..=bars.len() {
            let prefix = run(&strategy, &bars[..k], &cash(dec!(10000)));
            let cutoff = bars[k - 1].date;
            let full_prefix: Vec<&Trade> =
                full.trades.iter().filter(|t| t.date <= cutoff).collect();
            let partial: Vec<&Trade> = prefix.trades.iter().collect();
            assert_eq!(partial, full_prefix);
            assert_eq!(&prefix.daily_equity[..], &full.daily_equity[..k]);
        }
    }

    #[test]
    fn test_deterministic() {
        let strategy = ladder(true);
        let bars = vec![
            bar(1, dec!(10.0), dec!(10.1), dec!(8.0), dec!(8.2)),
            bar(2, dec!(8.3), dec!(10.6), dec!(8.2), dec!(10.4)),
        ];
        let first = run(&strategy, &bars, &cash(dec!(5000)));
        let second = run(&strategy, &bars, &cash(dec!(5000)));
        assert_eq!(first, second);
    }

    #[test]
    fn test_window_dates_come_from_bars() {
        let strategy = ladder(true);
        let bars: Vec<OhlcBar> = (4..=8)
            .map(|d| bar(d, dec!(11), dec!(11.5), dec!(10.8), dec!(11)))
            .collect();
        let result =
            GridSimulator::run(&strategy, "399971", &bars, Some(day(1)), Some(day(6)), &cash(dec!(1000)))
                .unwrap();
        assert_eq!(result.start_date, day(4));
        assert_eq!(result.end_date, day(6));
        assert_eq!(result.daily_equity.len(), 3);
        assert!(result.trades.is_empty());
        assert_eq!(result.metrics.total_return, Decimal::ZERO);
    }
}
