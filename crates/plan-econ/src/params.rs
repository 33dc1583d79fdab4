//! Model parameters: the versioned constant tables behind every projection.
//!
//! `ModelParams::reference()` rebuilds the reference model from the constant
//! tables below. Editing a table changes every historical projection, so any
//! change must also bump [`MODEL_VERSION`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version tag stamped on every planning result computed with the reference tables.
pub const MODEL_VERSION: &str = "ramp-v1";

/// Ramp curve factors for months 1..=6 after launch, as `(mantissa, scale)`.
pub const REFERENCE_CURVE: [(i64, u32); 6] = [(45, 3), (10, 2), (20, 2), (40, 2), (70, 2), (100, 2)];

/// Population tiers: (name, minimum population, marketing unit cost, operational unit cost).
///
/// Ordered from largest to smallest city.
pub const REFERENCE_TIERS: [(&str, i64, i64, i64); 3] = [
    ("large", 100_001, 5, 3),
    ("mid", 50_000, 6, 4),
    ("small", 0, 7, 5),
];

/// Share of the 15-44 population expected to ride each month at steady state (10%).
pub const REFERENCE_TARGET_PENETRATION: (i64, u32) = (10, 2);
/// Monthly marketing unit-cost decay (10%).
pub const REFERENCE_MARKETING_DECAY: (i64, u32) = (10, 2);
/// Monthly operational unit-cost decay (8%).
pub const REFERENCE_OPERATIONAL_DECAY: (i64, u32) = (8, 2);
/// Revenue per completed ride (7.50).
pub const REFERENCE_REVENUE_PER_RIDE: (i64, u32) = (750, 2);
/// Multiplier turning a projected cost into an estimated actual (0.95).
pub const REFERENCE_FALLBACK_RATIO: (i64, u32) = (95, 2);
/// Default reporting window length in months.
pub const REFERENCE_WINDOW_MONTHS: u32 = 12;

fn dec((mantissa, scale): (i64, u32)) -> Decimal {
    Decimal::new(mantissa, scale)
}

fn default_window_months() -> u32 {
    REFERENCE_WINDOW_MONTHS
}

/// Baseline per-ride unit costs for a population bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostTier {
    pub name: String,
    /// Smallest population (inclusive) that falls in this tier.
    pub min_population: i64,
    /// Marketing cost per ride in the launch month.
    pub marketing_unit_cost: Decimal,
    /// Operational cost per ride in the launch month.
    pub operational_unit_cost: Decimal,
}

/// Full parameter set for the projection model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Version tag recorded with every computed result.
    pub version: String,
    /// Share of the 15-44 band riding each month once ramp-up completes.
    pub target_penetration: Decimal,
    /// Number of ramp months; must equal `curve_factors.len()`.
    pub ramp_window_months: u32,
    /// Factor applied to the base goal for months 1..=window; non-decreasing, ends at 1.
    pub curve_factors: Vec<Decimal>,
    /// Ordered by descending `min_population`; the last tier must start at 0.
    pub tiers: Vec<CostTier>,
    /// Share of the marketing unit cost removed per month after launch.
    pub marketing_decay_per_month: Decimal,
    /// Share of the operational unit cost removed per month after launch.
    pub operational_decay_per_month: Decimal,
    pub revenue_per_ride: Decimal,
    /// Multiplier applied to projected cost when no actual is recorded.
    pub fallback_efficiency_ratio: Decimal,
    /// Length of a block's reporting window when none is requested.
    #[serde(default = "default_window_months")]
    pub default_window_months: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::reference()
    }
}

/// Inconsistent model parameters.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    /// No curve factors.
    #[error("curve factor table is empty")]
    EmptyCurve,
    /// `ramp_window_months` differs from the number of factors.
    #[error("ramp window is {window} months but curve has {factors} factors")]
    CurveLengthMismatch { window: u32, factors: usize },
    /// A factor outside [0, 1].
    #[error("curve factor for month {month} must be within [0, 1], got {factor}")]
    FactorOutOfRange { month: usize, factor: Decimal },
    /// A factor below its predecessor.
    #[error("curve factor for month {month} decreases")]
    CurveNotMonotonic { month: usize },
    /// Last factor is not exactly 1.
    #[error("final curve factor must be 1, got {0}")]
    FinalFactorNotOne(Decimal),
    /// No tiers.
    #[error("tier table is empty")]
    EmptyTiers,
    /// Tier thresholds not strictly descending.
    #[error("tier '{0}' is not ordered by descending minimum population")]
    TiersNotDescending(String),
    /// Last tier does not start at population 0.
    #[error("smallest tier must start at population 0")]
    MissingFloorTier,
    /// A larger tier costs more per ride than a smaller one.
    #[error("tier '{larger}' has a higher unit cost than smaller tier '{smaller}'")]
    TierCostInversion { larger: String, smaller: String },
    /// Named rate or cost is negative.
    #[error("{0} must be non-negative")]
    Negative(&'static str),
    /// Penetration outside [0, 1].
    #[error("target penetration must be within [0, 1], got {0}")]
    PenetrationOutOfRange(Decimal),
    /// YAML could not be parsed into parameters.
    #[error("invalid parameter file: {0}")]
    Parse(String),
}

impl ModelParams {
    /// The reference model built from the constant tables.
    pub fn reference() -> Self {
        let curve_factors: Vec<Decimal> = REFERENCE_CURVE.iter().copied().map(dec).collect();
        let tiers = REFERENCE_TIERS
            .iter()
            .map(|&(name, min_population, marketing, operational)| CostTier {
                name: name.to_string(),
                min_population,
                marketing_unit_cost: Decimal::from(marketing),
                operational_unit_cost: Decimal::from(operational),
            })
            .collect();
        Self {
            version: MODEL_VERSION.to_string(),
            target_penetration: dec(REFERENCE_TARGET_PENETRATION),
            ramp_window_months: curve_factors.len() as u32,
            curve_factors,
            tiers,
            marketing_decay_per_month: dec(REFERENCE_MARKETING_DECAY),
            operational_decay_per_month: dec(REFERENCE_OPERATIONAL_DECAY),
            revenue_per_ride: dec(REFERENCE_REVENUE_PER_RIDE),
            fallback_efficiency_ratio: dec(REFERENCE_FALLBACK_RATIO),
            default_window_months: REFERENCE_WINDOW_MONTHS,
        }
    }

    /// Parse and validate parameters from YAML.
    pub fn from_yaml_str(text: &str) -> Result<Self, ParamError> {
        let params: ModelParams =
            serde_yaml::from_str(text).map_err(|e| ParamError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Check internal consistency of the tables.
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.curve_factors.is_empty() {
            return Err(ParamError::EmptyCurve);
        }
        if self.curve_factors.len() != self.ramp_window_months as usize {
            return Err(ParamError::CurveLengthMismatch {
                window: self.ramp_window_months,
                factors: self.curve_factors.len(),
            });
        }
        let mut prev = Decimal::ZERO;
        for (i, &factor) in self.curve_factors.iter().enumerate() {
            let month = i + 1;
            if factor < Decimal::ZERO || factor > Decimal::ONE {
                return Err(ParamError::FactorOutOfRange { month, factor });
            }
            if factor < prev {
                return Err(ParamError::CurveNotMonotonic { month });
            }
            prev = factor;
        }
        if prev != Decimal::ONE {
            return Err(ParamError::FinalFactorNotOne(prev));
        }

        let (first, rest) = self.tiers.split_first().ok_or(ParamError::EmptyTiers)?;
        let mut larger = first;
        for tier in rest {
            if tier.min_population >= larger.min_population {
                return Err(ParamError::TiersNotDescending(tier.name.clone()));
            }
            if larger.marketing_unit_cost > tier.marketing_unit_cost
                || larger.operational_unit_cost > tier.operational_unit_cost
            {
                return Err(ParamError::TierCostInversion {
                    larger: larger.name.clone(),
                    smaller: tier.name.clone(),
                });
            }
            larger = tier;
        }
        if larger.min_population != 0 {
            return Err(ParamError::MissingFloorTier);
        }
        for tier in &self.tiers {
            if tier.marketing_unit_cost < Decimal::ZERO || tier.operational_unit_cost < Decimal::ZERO {
                return Err(ParamError::Negative("tier unit cost"));
            }
        }

        if self.target_penetration < Decimal::ZERO || self.target_penetration > Decimal::ONE {
            return Err(ParamError::PenetrationOutOfRange(self.target_penetration));
        }
        let non_negative = [
            (self.marketing_decay_per_month, "marketing_decay_per_month"),
            (self.operational_decay_per_month, "operational_decay_per_month"),
            (self.revenue_per_ride, "revenue_per_ride"),
            (self.fallback_efficiency_ratio, "fallback_efficiency_ratio"),
        ];
        for (value, name) in non_negative {
            if value < Decimal::ZERO {
                return Err(ParamError::Negative(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_valid() {
        let p = ModelParams::reference();
        p.validate().unwrap();
        assert_eq!(p.ramp_window_months, 6);
        assert_eq!(p.curve_factors[0], Decimal::new(45, 3));
        assert_eq!(*p.curve_factors.last().unwrap(), Decimal::ONE);
        assert_eq!(p.version, MODEL_VERSION);
    }

    #[test]
    fn reference_yaml_matches_constants() {
        let text = include_str!("../../../assets/model/ramp-v1.yaml");
        let p = ModelParams::from_yaml_str(text).unwrap();
        assert_eq!(p, ModelParams::reference());
    }

    #[test]
    fn rejects_decreasing_curve() {
        let mut p = ModelParams::reference();
        p.curve_factors[3] = Decimal::new(1, 2);
        assert_eq!(p.validate(), Err(ParamError::CurveNotMonotonic { month: 4 }));
    }

    #[test]
    fn rejects_curve_not_reaching_one() {
        let mut p = ModelParams::reference();
        p.curve_factors[5] = Decimal::new(90, 2);
        assert_eq!(p.validate(), Err(ParamError::FinalFactorNotOne(Decimal::new(90, 2))));
    }

    #[test]
    fn rejects_window_mismatch() {
        let mut p = ModelParams::reference();
        p.ramp_window_months = 12;
        assert!(matches!(p.validate(), Err(ParamError::CurveLengthMismatch { .. })));
    }

    #[test]
    fn rejects_tier_cost_inversion() {
        let mut p = ModelParams::reference();
        p.tiers[0].marketing_unit_cost = Decimal::new(9, 0);
        assert!(matches!(p.validate(), Err(ParamError::TierCostInversion { .. })));
    }

    #[test]
    fn rejects_unordered_and_floorless_tiers() {
        let mut p = ModelParams::reference();
        p.tiers.swap(0, 1);
        assert_eq!(p.validate(), Err(ParamError::TiersNotDescending("large".to_string())));

        let mut p = ModelParams::reference();
        p.tiers[2].min_population = 10;
        assert_eq!(p.validate(), Err(ParamError::MissingFloorTier));
    }

    #[test]
    fn yaml_errors_are_reported() {
        assert!(matches!(
            ModelParams::from_yaml_str("version: [unclosed"),
            Err(ParamError::Parse(_))
        ));
    }
}
