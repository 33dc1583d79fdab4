//! Ramp-up curve: monthly ride goals from the addressable demographic.

use crate::params::ModelParams;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round a ride quantity half away from zero to a whole, non-negative count.
pub fn round_rides(value: Decimal) -> u64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .unwrap_or(0)
}

/// Steady-state monthly ride goal once ramp-up completes.
pub fn base_goal(population_15_to_44: u64, params: &ModelParams) -> u64 {
    round_rides(Decimal::from(population_15_to_44) * params.target_penetration)
}

/// Curve factor for a 1-based month index.
///
/// Zero before launch, the table value inside the ramp window and 1 after it.
pub fn curve_factor(months_since_launch: i64, params: &ModelParams) -> Decimal {
    if months_since_launch <= 0 {
        return Decimal::ZERO;
    }
    usize::try_from(months_since_launch - 1)
        .ok()
        .and_then(|i| params.curve_factors.get(i))
        .copied()
        .unwrap_or(Decimal::ONE)
}

/// Ride-count goal for the given month index.
pub fn ramp_goal(population_15_to_44: u64, months_since_launch: i64, params: &ModelParams) -> u64 {
    if months_since_launch <= 0 {
        return 0;
    }
    let base = base_goal(population_15_to_44, params);
    if months_since_launch > i64::from(params.ramp_window_months) {
        return base;
    }
    round_rides(Decimal::from(base) * curve_factor(months_since_launch, params))
}
