//! Ladder decay functions
//!
//! A decay function maps the level ratio of row `i - 1` to row `i`. Row 0
//! always has ratio 1 (the first trigger price). The generator rejects any
//! ladder whose prices fail to strictly decrease, so a decay function only has
//! to be well-defined, not provably monotonic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Running ratios are kept at this precision so deep ladders never exhaust
/// Decimal's 28 digits
const RATIO_SCALE: u32 = 12;

/// Pluggable price ladder step
pub trait DecayFunction: Send + Sync {
    /// Ratio of the next row given the previous one. `None` when the step is
    /// undefined for these parameters (e.g. division by zero).
    fn next_ratio(&self, a: Decimal, b: Decimal, previous: Decimal) -> Option<Decimal>;

    fn name(&self) -> &'static str;
}

/// Built-in decay functions selectable from a config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayModel {
    /// `ratio[i] = ratio[i-1] × (1 − a/b)`
    #[default]
    Geometric,
    /// `ratio[i] = ratio[i-1] / (1 + a/2)`
    HalfStep,
}

impl DecayFunction for DecayModel {
    fn next_ratio(&self, a: Decimal, b: Decimal, previous: Decimal) -> Option<Decimal> {
        let next = match self {
            DecayModel::Geometric => {
                let step = Decimal::ONE.checked_sub(a.checked_div(b)?)?;
                previous.checked_mul(step)?
            }
            DecayModel::HalfStep => {
                let divisor = Decimal::ONE.checked_add(a.checked_div(Decimal::TWO)?)?;
                previous.checked_div(divisor)?
            }
        };
        Some(next.round_dp(RATIO_SCALE))
    }

    fn name(&self) -> &'static str {
        match self {
            DecayModel::Geometric => "geometric",
            DecayModel::HalfStep => "half_step",
        }
    }
}

impl std::str::FromStr for DecayModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geometric" => Ok(DecayModel::Geometric),
            "half_step" => Ok(DecayModel::HalfStep),
            other => Err(format!("unknown decay model '{other}'")),
        }
    }
}
