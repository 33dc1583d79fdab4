//! Population tiers and per-ride unit costs.

use crate::params::{CostTier, ModelParams};
use plan_core::CostPair;
use rust_decimal::Decimal;

/// Tier for a city of `population` inhabitants.
///
/// Tiers are scanned from largest to smallest; a population below every
/// threshold falls into the smallest tier.
pub fn resolve_tier(population: i64, params: &ModelParams) -> Option<&CostTier> {
    params
        .tiers
        .iter()
        .find(|t| population >= t.min_population)
        .or_else(|| params.tiers.last())
}

/// Undecayed per-ride (marketing, operational) unit costs.
pub fn baseline_unit_costs(population: i64, params: &ModelParams) -> CostPair {
    resolve_tier(population, params)
        .map(|t| CostPair::new(t.marketing_unit_cost, t.operational_unit_cost))
        .unwrap_or(CostPair::ZERO)
}

/// Remaining fraction of a unit cost after `months_since_launch` months of decay.
///
/// Month 1 is undecayed, each later month inside the ramp window removes
/// `rate`, and the result never drops below zero.
pub fn decay_multiplier(rate: Decimal, months_since_launch: i64, params: &ModelParams) -> Decimal {
    let window = i64::from(params.ramp_window_months.max(1));
    let steps = months_since_launch.clamp(1, window) - 1;
    (Decimal::ONE - rate * Decimal::from(steps)).max(Decimal::ZERO)
}

/// Unit costs for a month index, with the learning-curve decay applied.
pub fn decayed_unit_costs(base: CostPair, months_since_launch: i64, params: &ModelParams) -> CostPair {
    CostPair::new(
        base.marketing * decay_multiplier(params.marketing_decay_per_month, months_since_launch, params),
        base.operational
            * decay_multiplier(params.operational_decay_per_month, months_since_launch, params),
    )
}
