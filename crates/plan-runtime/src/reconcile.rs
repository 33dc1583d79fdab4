//! Reconciliation of projected costs against recorded actuals.
//!
//! A city-month either has a recorded cost, which is reported verbatim, or
//! gets an estimate derived from the projection. The two cases stay tagged all
//! the way to the caller so an estimate is never presented as measured data.

use plan_core::{CityId, CostPair, MonthKey, MonthlyProjection};
use plan_econ::CitySeries;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cost reported as "real" for one city-month.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cost", rename_all = "snake_case")]
pub enum ReconciledCost {
    /// Recorded cost, unchanged.
    Actual(CostPair),
    /// Projected cost times the fallback efficiency ratio.
    Estimated(CostPair),
}

impl ReconciledCost {
    pub fn cost(&self) -> CostPair {
        match self {
            ReconciledCost::Actual(c) | ReconciledCost::Estimated(c) => *c,
        }
    }

    pub fn is_actual(&self) -> bool {
        matches!(self, ReconciledCost::Actual(_))
    }
}

/// Resolve the reported cost for one city-month. Never fails.
pub fn reconcile_month(projected: CostPair, actual: Option<&CostPair>, fallback_ratio: Decimal) -> ReconciledCost {
    match actual {
        Some(a) => ReconciledCost::Actual(*a),
        None => ReconciledCost::Estimated(projected.scaled(fallback_ratio)),
    }
}

/// Projection and reconciled cost for one month.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconciledMonth {
    pub projection: MonthlyProjection,
    pub reconciled: ReconciledCost,
}

/// Reconciled series for one city, in calendar order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconciledSeries {
    pub city_id: CityId,
    pub months: Vec<ReconciledMonth>,
}

impl ReconciledSeries {
    pub fn get(&self, month: MonthKey) -> Option<&ReconciledMonth> {
        self.months.iter().find(|m| m.projection.month == month)
    }

    pub fn actual_months(&self) -> usize {
        self.months.iter().filter(|m| m.reconciled.is_actual()).count()
    }

    pub fn estimated_months(&self) -> usize {
        self.months.len() - self.actual_months()
    }
}

/// Reconcile every month of `series` against `actuals`.
///
/// Actuals for months outside the series are ignored here.
pub fn reconcile_series(
    series: &CitySeries,
    actuals: &BTreeMap<MonthKey, CostPair>,
    fallback_ratio: Decimal,
) -> ReconciledSeries {
    let months = series
        .months
        .iter()
        .map(|p| ReconciledMonth {
            reconciled: reconcile_month(p.projected_cost(), actuals.get(&p.month), fallback_ratio),
            projection: p.clone(),
        })
        .collect();
    ReconciledSeries {
        city_id: series.city_id,
        months,
    }
}
