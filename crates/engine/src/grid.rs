//! Grid strategy generator
//!
//! Builds the price ladder for a [`StrategyConfig`]. Row `i` triggers at
//! `first_trigger_price × ratio[i]`, buys at the trigger minus the configured
//! slippage, sells at `buy_price × (1 + profit_margin)` and holds as many whole
//! lots as `buy_amount` affords at the buy price.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::decay::DecayFunction;
use crate::error::{GridError, GridResult};
use crate::types::{GridRow, Strategy, StrategyConfig, PRICE_SCALE};

/// Upper bound on `total_rows` accepted from a config
pub const MAX_ROWS: u32 = 1_000;

fn round_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Reject configs that cannot produce a ladder, before touching any row
pub fn validate_config(config: &StrategyConfig) -> GridResult<()> {
    if config.total_rows < 1 {
        return Err(GridError::invalid_config("total_rows", "must be at least 1"));
    }
    if config.total_rows > MAX_ROWS {
        return Err(GridError::invalid_config(
            "total_rows",
            format!("must be at most {MAX_ROWS}"),
        ));
    }
    if config.buy_amount <= Decimal::ZERO {
        return Err(GridError::invalid_config("buy_amount", "must be positive"));
    }
    if config.first_trigger_price <= Decimal::ZERO {
        return Err(GridError::invalid_config(
            "first_trigger_price",
            "must be positive",
        ));
    }
    if config.b.is_zero() {
        return Err(GridError::invalid_config("b", "must be non-zero"));
    }

    let policy = &config.policy;
    if policy.profit_margin <= Decimal::ZERO {
        return Err(GridError::invalid_config(
            "policy.profit_margin",
            "must be positive",
        ));
    }
    if policy.slippage < Decimal::ZERO {
        return Err(GridError::invalid_config(
            "policy.slippage",
            "must not be negative",
        ));
    }
    if policy.lot_size == 0 {
        return Err(GridError::invalid_config("policy.lot_size", "must be at least 1"));
    }

    Ok(())
}

/// Generate a strategy using the decay model named in the config
pub fn generate(config: &StrategyConfig) -> GridResult<Strategy> {
    let decay = config.policy.decay;
    generate_with(config, &decay)
}

/// Generate a strategy with an arbitrary decay function
pub fn generate_with(config: &StrategyConfig, decay: &dyn DecayFunction) -> GridResult<Strategy> {
    validate_config(config)?;

    let policy = &config.policy;
    let lot = Decimal::from(policy.lot_size);
    let mut rows: Vec<GridRow> = Vec::with_capacity(config.total_rows as usize);
    let mut ratio = Decimal::ONE;

    for index in 0..config.total_rows {
        if index > 0 {
            ratio = decay
                .next_ratio(config.a, config.b, ratio)
                .ok_or_else(|| {
                    GridError::invalid_config(
                        "a",
                        format!("{} decay is undefined at row {index}", decay.name()),
                    )
                })?;
        }

        let buy_trigger_price = config
            .first_trigger_price
            .checked_mul(ratio)
            .map(round_price)
            .ok_or_else(|| GridError::invalid_config("a", format!("price overflow at row {index}")))?;

        if buy_trigger_price <= Decimal::ZERO {
            return Err(GridError::invalid_config(
                "a",
                format!("trigger price at row {index} is not positive ({buy_trigger_price})"),
            ));
        }
        if let Some(prev) = rows.last() {
            if buy_trigger_price >= prev.buy_trigger_price {
                return Err(GridError::invalid_config(
                    "a",
                    format!(
                        "trigger price at row {index} ({buy_trigger_price}) does not decrease from {}",
                        prev.buy_trigger_price
                    ),
                ));
            }
        }

        let buy_price = round_price(buy_trigger_price - policy.slippage);
        if buy_price <= Decimal::ZERO {
            return Err(GridError::invalid_config(
                "policy.slippage",
                format!("buy price at row {index} is not positive"),
            ));
        }

        let sell_price = Decimal::ONE
            .checked_add(policy.profit_margin)
            .and_then(|factor| buy_price.checked_mul(factor))
            .map(round_price)
            .ok_or_else(|| {
                GridError::invalid_config(
                    "policy.profit_margin",
                    format!("sell price overflow at row {index}"),
                )
            })?;
        if sell_price <= buy_price {
            return Err(GridError::invalid_config(
                "policy.profit_margin",
                format!("sell price at row {index} does not exceed buy price {buy_price}"),
            ));
        }

        let shares = config
            .buy_amount
            .checked_div(buy_price)
            .and_then(|lots| lots.checked_div(lot))
            .and_then(|lots| lots.floor().checked_mul(lot))
            .ok_or_else(|| {
                GridError::invalid_config("buy_amount", format!("share count overflow at row {index}"))
            })?;
        if shares.is_zero() {
            return Err(GridError::invalid_config(
                "buy_amount",
                format!(
                    "{} does not buy one lot of {} at row {index} (price {buy_price})",
                    config.buy_amount, policy.lot_size
                ),
            ));
        }

        rows.push(GridRow {
            index,
            level_ratio: ratio,
            buy_trigger_price,
            buy_price,
            buy_amount: config.buy_amount,
            shares,
            sell_price,
        });
    }

    debug!(
        rows = rows.len(),
        decay = decay.name(),
        first = %config.first_trigger_price,
        last = %rows.last().map(|r| r.buy_trigger_price).unwrap_or_default(),
        "Generated grid"
    );

    Ok(Strategy {
        id: None,
        config: config.clone(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decay::DecayModel;
    use crate::types::GridPolicy;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn scenario_a() -> StrategyConfig {
        StrategyConfig {
            name: Some("scenario-a".to_string()),
            a: dec!(1),
            b: dec!(10),
            first_trigger_price: dec!(10.0),
            total_rows: 3,
            buy_amount: dec!(1000),
            policy: GridPolicy::default(),
        }
    }

    fn field_of(err: GridError) -> String {
        match err {
            GridError::InvalidConfig { field, .. } => field,
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_scenario_a_geometric_ladder() {
        let strategy = generate(&scenario_a()).unwrap();
        let triggers: Vec<Decimal> = strategy.rows.iter().map(|r| r.buy_trigger_price).collect();
        assert_eq!(triggers, vec![dec!(10.0), dec!(9.0), dec!(8.1)]);

        for row in &strategy.rows {
            assert_eq!(row.buy_price, row.buy_trigger_price);
            assert_eq!(row.shares, dec!(100));
            assert_eq!(row.buy_amount, dec!(1000));
        }
        assert_eq!(strategy.rows[0].sell_price, dec!(10.5));
        assert_eq!(strategy.rows[2].sell_price, dec!(8.505));
        assert_eq!(strategy.rows[1].level_ratio, dec!(0.9));
        assert!(strategy.id.is_none());
    }

    #[test]
    fn test_scenario_d_zero_rows_rejected() {
        let config = StrategyConfig {
            total_rows: 0,
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&config).unwrap_err()), "total_rows");
    }

    #[test]
    fn test_rejects_bad_scalars() {
        let zero_b = StrategyConfig {
            b: Decimal::ZERO,
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&zero_b).unwrap_err()), "b");

        let no_money = StrategyConfig {
            buy_amount: Decimal::ZERO,
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&no_money).unwrap_err()), "buy_amount");

        let negative_price = StrategyConfig {
            first_trigger_price: dec!(-1),
            ..scenario_a()
        };
        assert_eq!(
            field_of(generate(&negative_price).unwrap_err()),
            "first_trigger_price"
        );
    }

    #[test]
    fn test_rejects_non_decreasing_ladder() {
        // a/b < 0 makes each step larger than the previous
        let rising = StrategyConfig {
            a: dec!(-1),
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&rising).unwrap_err()), "a");

        // a/b = 1 collapses row 1 to zero
        let collapsing = StrategyConfig {
            a: dec!(10),
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&collapsing).unwrap_err()), "a");
    }

    #[test]
    fn test_rounding_collapse_is_rejected() {
        // Step of 1e-6 disappears once prices are rounded to 4 places
        let flat = StrategyConfig {
            a: dec!(0.000001),
            b: dec!(1),
            first_trigger_price: dec!(1),
            buy_amount: dec!(10000),
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&flat).unwrap_err()), "a");
    }

    #[test]
    fn test_shares_round_down_to_lot() {
        let config = StrategyConfig {
            buy_amount: dec!(2599),
            ..scenario_a()
        };
        let strategy = generate(&config).unwrap();
        // 2599 / 10 = 259.9 -> 200; 2599 / 9 = 288.7 -> 200; 2599 / 8.1 = 320.8 -> 300
        let shares: Vec<Decimal> = strategy.rows.iter().map(|r| r.shares).collect();
        assert_eq!(shares, vec![dec!(200), dec!(200), dec!(300)]);
    }

    #[test]
    fn test_amount_below_one_lot_rejected() {
        let config = StrategyConfig {
            buy_amount: dec!(500),
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&config).unwrap_err()), "buy_amount");
    }

    #[test]
    fn test_oversized_row_count_rejected() {
        let config = StrategyConfig {
            total_rows: 2_000_000_000,
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&config).unwrap_err()), "total_rows");

        let config = StrategyConfig {
            total_rows: MAX_ROWS + 1,
            ..scenario_a()
        };
        assert_eq!(field_of(validate_config(&config).unwrap_err()), "total_rows");
    }

    #[test]
    fn test_overflowing_margin_is_an_error() {
        let config = StrategyConfig {
            policy: GridPolicy {
                profit_margin: Decimal::from_str("10000000000000000000000000000").unwrap(),
                ..GridPolicy::default()
            },
            ..scenario_a()
        };
        assert_eq!(
            field_of(generate(&config).unwrap_err()),
            "policy.profit_margin"
        );
    }

    #[test]
    fn test_overflowing_amount_is_an_error() {
        let config = StrategyConfig {
            buy_amount: Decimal::from_str("70000000000000000000000000000").unwrap(),
            first_trigger_price: dec!(0.5),
            ..scenario_a()
        };
        assert_eq!(field_of(generate(&config).unwrap_err()), "buy_amount");
    }

    #[test]
    fn test_slippage_and_margin_policy() {
        let config = StrategyConfig {
            policy: GridPolicy {
                slippage: dec!(0.005),
                profit_margin: dec!(0.10),
                lot_size: 1,
                ..GridPolicy::default()
            },
            ..scenario_a()
        };
        let strategy = generate(&config).unwrap();
        let row = &strategy.rows[0];
        assert_eq!(row.buy_price, dec!(9.995));
        assert_eq!(row.sell_price, dec!(10.9945));
        assert_eq!(row.shares, dec!(100));
        assert!(row.buy_price <= row.buy_trigger_price);
    }

    #[test]
    fn test_half_step_model() {
        let config = StrategyConfig {
            a: dec!(0.10),
            b: dec!(0.10),
            first_trigger_price: dec!(1.000),
            total_rows: 5,
            buy_amount: dec!(10000),
            policy: GridPolicy {
                decay: DecayModel::HalfStep,
                ..GridPolicy::default()
            },
            name: None,
        };
        let strategy = generate(&config).unwrap();
        assert_eq!(strategy.rows.len(), 5);
        assert_eq!(strategy.rows[1].buy_trigger_price, dec!(0.9524));
    }

    struct LinearDecay {
        step: Decimal,
    }

    impl DecayFunction for LinearDecay {
        fn next_ratio(&self, _a: Decimal, _b: Decimal, previous: Decimal) -> Option<Decimal> {
            Some(previous - self.step)
        }

        fn name(&self) -> &'static str {
            "linear"
        }
    }

    #[test]
    fn test_pluggable_decay_function() {
        let decay = LinearDecay { step: dec!(0.25) };
        let config = StrategyConfig {
            total_rows: 4,
            buy_amount: dec!(5000),
            ..scenario_a()
        };
        let strategy = generate_with(&config, &decay).unwrap();
        let triggers: Vec<Decimal> = strategy.rows.iter().map(|r| r.buy_trigger_price).collect();
        assert_eq!(triggers, vec![dec!(10), dec!(7.5), dec!(5), dec!(2.5)]);

        // Fifth row would be zero
        let too_deep = StrategyConfig {
            total_rows: 5,
            ..config
        };
        assert!(generate_with(&too_deep, &decay).is_err());
    }

    #[test]
    fn test_ladder_invariants_hold_across_configs() {
        let cases = [
            (dec!(1), dec!(10), dec!(10), 20u32, dec!(5000)),
            (dec!(0.3), dec!(6), dec!(3.5), 15, dec!(20000)),
            (dec!(2), dec!(100), dec!(120), 40, dec!(100000)),
        ];
        for (a, b, first, total_rows, buy_amount) in cases {
            let config = StrategyConfig {
                name: None,
                a,
                b,
                first_trigger_price: first,
                total_rows,
                buy_amount,
                policy: GridPolicy::default(),
            };
            let strategy = generate(&config).unwrap();
            assert_eq!(strategy.rows.len(), total_rows as usize);
            for (i, row) in strategy.rows.iter().enumerate() {
                assert_eq!(row.index as usize, i);
                assert!(row.sell_price > row.buy_price);
                assert!(row.buy_price <= row.buy_trigger_price);
                assert!(row.shares > Decimal::ZERO);
                if i > 0 {
                    assert!(row.buy_trigger_price < strategy.rows[i - 1].buy_trigger_price);
                }
            }
        }
    }

    #[test]
    fn test_generation_is_repeatable() {
        assert_eq!(generate(&scenario_a()).unwrap(), generate(&scenario_a()).unwrap());
    }
}
