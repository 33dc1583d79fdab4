//! Market-block aggregation of reconciled city series.

use crate::reconcile::{reconcile_series, ReconciledSeries};
use crate::store::PlanStore;
use plan_core::{CityId, CityStatus, CostPair, MarketBlock, PlanError, ReportingWindow};
use plan_econ::{project_city, ModelParams};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::iter::Sum;
use std::ops::Add;
use tracing::{info, warn};

/// Which cities take part in a block projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Only cities in expansion or consolidated.
    #[default]
    ActiveOnly,
    /// Every city in the block.
    All,
}

/// What to do with a city whose record fails validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the whole request.
    #[default]
    FailFast,
    /// Leave the city out and list it in [`BlockReport::excluded`].
    ExcludeAndReport,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    pub status: StatusFilter,
    pub on_invalid: FailurePolicy,
}

/// Summed figures for one city or a whole block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub rides: u64,
    pub projected_marketing: Decimal,
    pub projected_operational: Decimal,
    pub reconciled_marketing: Decimal,
    pub reconciled_operational: Decimal,
    pub revenue: Decimal,
    /// Months backed by a recorded cost.
    pub actual_months: u64,
    /// Months whose reconciled cost is an estimate.
    pub estimated_months: u64,
}

impl Totals {
    pub fn projected_cost(&self) -> CostPair {
        CostPair::new(self.projected_marketing, self.projected_operational)
    }

    pub fn reconciled_cost(&self) -> CostPair {
        CostPair::new(self.reconciled_marketing, self.reconciled_operational)
    }

    /// KPIs on the projected cost basis.
    pub fn projected_kpis(&self) -> Kpis {
        Kpis::compute(self.rides, self.projected_cost(), self.revenue)
    }

    /// KPIs on the reconciled cost basis.
    pub fn reconciled_kpis(&self) -> Kpis {
        Kpis::compute(self.rides, self.reconciled_cost(), self.revenue)
    }
}

impl From<&ReconciledSeries> for Totals {
    fn from(series: &ReconciledSeries) -> Self {
        let mut t = Totals::default();
        for m in &series.months {
            let reconciled = m.reconciled.cost();
            t.rides += m.projection.rides;
            t.projected_marketing += m.projection.projected_marketing;
            t.projected_operational += m.projection.projected_operational;
            t.reconciled_marketing += reconciled.marketing;
            t.reconciled_operational += reconciled.operational;
            t.revenue += m.projection.projected_revenue;
            if m.reconciled.is_actual() {
                t.actual_months += 1;
            } else {
                t.estimated_months += 1;
            }
        }
        t
    }
}

impl Add for Totals {
    type Output = Totals;

    fn add(self, rhs: Totals) -> Totals {
        Totals {
            rides: self.rides + rhs.rides,
            projected_marketing: self.projected_marketing + rhs.projected_marketing,
            projected_operational: self.projected_operational + rhs.projected_operational,
            reconciled_marketing: self.reconciled_marketing + rhs.reconciled_marketing,
            reconciled_operational: self.reconciled_operational + rhs.reconciled_operational,
            revenue: self.revenue + rhs.revenue,
            actual_months: self.actual_months + rhs.actual_months,
            estimated_months: self.estimated_months + rhs.estimated_months,
        }
    }
}

impl<'a> Sum<&'a Totals> for Totals {
    fn sum<I: Iterator<Item = &'a Totals>>(iter: I) -> Self {
        iter.fold(Totals::default(), |acc, t| acc + *t)
    }
}

/// Derived block indicators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Kpis {
    /// (marketing + operational) / rides; zero when there are no rides.
    pub cost_per_ride: Decimal,
    /// revenue - marketing - operational.
    pub margin: Decimal,
}

impl Kpis {
    pub fn compute(rides: u64, cost: CostPair, revenue: Decimal) -> Self {
        let cost_per_ride = if rides == 0 {
            Decimal::ZERO
        } else {
            cost.total() / Decimal::from(rides)
        };
        Self {
            cost_per_ride,
            margin: revenue - cost.marketing - cost.operational,
        }
    }
}

/// Totals for one city in a block report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CityTotals {
    pub city_id: CityId,
    pub name: String,
    pub totals: Totals,
}

/// Why a city listed in a block was left out.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    InactiveStatus { status: CityStatus },
    InvalidData { message: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExcludedCity {
    pub city_id: CityId,
    pub reason: ExclusionReason,
}

/// Block-level aggregation result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockReport {
    pub block: String,
    pub window: ReportingWindow,
    pub cities: Vec<CityTotals>,
    /// Field-wise sum of `cities`.
    pub totals: Totals,
    pub projected_kpis: Kpis,
    pub reconciled_kpis: Kpis,
    pub excluded: Vec<ExcludedCity>,
}

impl BlockReport {
    /// Assemble a report from per-city totals; block totals are their plain sum.
    pub fn from_cities(
        block: &str,
        window: ReportingWindow,
        cities: Vec<CityTotals>,
        excluded: Vec<ExcludedCity>,
    ) -> Self {
        let totals: Totals = cities.iter().map(|c| &c.totals).sum();
        Self {
            block: block.to_string(),
            window,
            projected_kpis: totals.projected_kpis(),
            reconciled_kpis: totals.reconciled_kpis(),
            totals,
            cities,
            excluded,
        }
    }
}

/// Project, reconcile and sum every eligible city of `block` over `window`.
///
/// A block entry naming a missing city is always an error. Invalid city data
/// either fails the request or excludes the city, per `options.on_invalid`.
/// Repeated ids are counted once.
pub fn aggregate_block<S: PlanStore + ?Sized>(
    block: &MarketBlock,
    store: &S,
    params: &ModelParams,
    window: &ReportingWindow,
    options: AggregateOptions,
) -> Result<BlockReport, PlanError> {
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(block.city_ids.len());
    for &id in &block.city_ids {
        if !seen.insert(id) {
            warn!(block = %block.name, city = %id, "duplicate city in block ignored");
            continue;
        }
        let city = store.city(id).ok_or_else(|| PlanError::DanglingReference {
            block: block.name.clone(),
            city: id,
        })?;
        resolved.push(city);
    }

    let mut cities = Vec::with_capacity(resolved.len());
    let mut excluded = Vec::new();
    for city in resolved {
        if options.status == StatusFilter::ActiveOnly && !city.status.is_active() {
            excluded.push(ExcludedCity {
                city_id: city.id,
                reason: ExclusionReason::InactiveStatus {
                    status: city.status,
                },
            });
            continue;
        }
        let series = match project_city(&city, window, params) {
            Ok(s) => s,
            Err(e) if options.on_invalid == FailurePolicy::ExcludeAndReport => {
                warn!(block = %block.name, city = %city.id, error = %e, "city excluded from block");
                excluded.push(ExcludedCity {
                    city_id: city.id,
                    reason: ExclusionReason::InvalidData {
                        message: e.to_string(),
                    },
                });
                continue;
            }
            Err(e) => return Err(e),
        };
        let actuals = store.real_costs(city.id);
        let reconciled = reconcile_series(&series, &actuals, params.fallback_efficiency_ratio);
        cities.push(CityTotals {
            city_id: city.id,
            name: city.name,
            totals: Totals::from(&reconciled),
        });
    }

    let report = BlockReport::from_cities(&block.name, *window, cities, excluded);
    info!(
        block = %report.block,
        cities = report.cities.len(),
        excluded = report.excluded.len(),
        rides = report.totals.rides,
        "aggregated market block"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use plan_core::{City, MonthKey, RealMonthlyCost};
    use proptest::prelude::*;

    fn month(y: i32, m: u32) -> MonthKey {
        MonthKey::new(y, m).unwrap()
    }

    fn city(id: u32, population: i64, band: i64, status: CityStatus) -> City {
        City {
            id: CityId(id),
            name: format!("City {id}"),
            population,
            population_15_to_44: band,
            implementation_start: Some(month(2024, 1)),
            status,
        }
    }

    fn block(ids: &[u32]) -> MarketBlock {
        MarketBlock {
            name: "South".to_string(),
            city_ids: ids.iter().map(|&i| CityId(i)).collect(),
        }
    }

    #[test]
    fn kpis_are_division_safe() {
        let k = Kpis::compute(0, CostPair::new(Decimal::new(10, 0), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(k.cost_per_ride, Decimal::ZERO);
        assert_eq!(k.margin, Decimal::new(-10, 0));
        let k = Kpis::compute(4, CostPair::new(Decimal::new(6, 0), Decimal::new(4, 0)), Decimal::new(30, 0));
        assert_eq!(k.cost_per_ride, Decimal::new(25, 1));
        assert_eq!(k.margin, Decimal::new(20, 0));
    }

    #[test]
    fn worked_example_single_month_block() {
        let store = MemoryStore::from_parts(
            vec![city(1, 60_000, 10_000, CityStatus::Expansion)],
            vec![],
            vec![],
        )
        .unwrap();
        let w = ReportingWindow::starting_at(month(2024, 1), 1).unwrap();
        let p = ModelParams::reference();
        let r = aggregate_block(&block(&[1]), &store, &p, &w, AggregateOptions::default()).unwrap();
        assert_eq!(r.totals.rides, 45);
        assert_eq!(r.totals.projected_marketing, Decimal::new(270, 0));
        assert_eq!(r.totals.reconciled_marketing, Decimal::new(2565, 1));
        assert_eq!(r.totals.reconciled_operational, Decimal::new(171, 0));
        assert_eq!(r.totals.revenue, Decimal::new(3375, 1));
        assert_eq!(r.totals.estimated_months, 1);
        assert_eq!(r.projected_kpis.cost_per_ride, Decimal::new(10, 0));
        assert_eq!(r.projected_kpis.margin, Decimal::new(-1125, 1));
    }

    #[test]
    fn dangling_reference_fails() {
        let store = MemoryStore::from_parts(vec![city(1, 60_000, 10_000, CityStatus::Expansion)], vec![], vec![]).unwrap();
        let w = ReportingWindow::starting_at(month(2024, 1), 3).unwrap();
        let err = aggregate_block(&block(&[1, 99]), &store, &ModelParams::reference(), &w, AggregateOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::DanglingReference {
                block: "South".to_string(),
                city: CityId(99)
            }
        );
    }

    #[test]
    fn invalid_city_fails_or_is_reported() {
        let store = MemoryStore::from_parts(
            vec![
                city(1, 60_000, 10_000, CityStatus::Expansion),
                city(2, 1_000, 5_000, CityStatus::Expansion),
            ],
            vec![],
            vec![],
        )
        .unwrap();
        let w = ReportingWindow::starting_at(month(2024, 1), 3).unwrap();
        let p = ModelParams::reference();
        let err = aggregate_block(&block(&[1, 2]), &store, &p, &w, AggregateOptions::default()).unwrap_err();
        assert_eq!(err.city(), Some(CityId(2)));

        let opts = AggregateOptions {
            on_invalid: FailurePolicy::ExcludeAndReport,
            ..AggregateOptions::default()
        };
        let r = aggregate_block(&block(&[1, 2]), &store, &p, &w, opts).unwrap();
        assert_eq!(r.cities.len(), 1);
        assert_eq!(r.excluded.len(), 1);
        assert_eq!(r.excluded[0].city_id, CityId(2));
        assert!(matches!(r.excluded[0].reason, ExclusionReason::InvalidData { .. }));
        // the valid city is unaffected by its neighbour
        let alone = aggregate_block(&block(&[1]), &store, &p, &w, AggregateOptions::default()).unwrap();
        assert_eq!(r.totals, alone.totals);
    }

    #[test]
    fn status_filter_controls_eligibility() {
        let store = MemoryStore::from_parts(
            vec![
                city(1, 60_000, 10_000, CityStatus::Expansion),
                city(2, 200_000, 80_000, CityStatus::Planning),
                city(3, 20_000, 9_000, CityStatus::Consolidated),
            ],
            vec![],
            vec![],
        )
        .unwrap();
        let w = ReportingWindow::starting_at(month(2024, 1), 6).unwrap();
        let p = ModelParams::reference();
        let active = aggregate_block(&block(&[1, 2, 3]), &store, &p, &w, AggregateOptions::default()).unwrap();
        assert_eq!(active.cities.len(), 2);
        assert_eq!(
            active.excluded,
            vec![ExcludedCity {
                city_id: CityId(2),
                reason: ExclusionReason::InactiveStatus {
                    status: CityStatus::Planning
                },
            }]
        );
        let opts = AggregateOptions {
            status: StatusFilter::All,
            ..AggregateOptions::default()
        };
        let all = aggregate_block(&block(&[1, 2, 3]), &store, &p, &w, opts).unwrap();
        assert_eq!(all.cities.len(), 3);
        assert!(all.excluded.is_empty());
    }

    #[test]
    fn duplicate_ids_count_once() {
        let store = MemoryStore::from_parts(vec![city(1, 60_000, 10_000, CityStatus::Expansion)], vec![], vec![]).unwrap();
        let w = ReportingWindow::starting_at(month(2024, 1), 3).unwrap();
        let p = ModelParams::reference();
        let once = aggregate_block(&block(&[1]), &store, &p, &w, AggregateOptions::default()).unwrap();
        let twice = aggregate_block(&block(&[1, 1]), &store, &p, &w, AggregateOptions::default()).unwrap();
        assert_eq!(once.totals, twice.totals);
    }

    #[test]
    fn oversized_population_is_invalid_data() {
        let huge = City {
            population: i64::MAX,
            population_15_to_44: i64::MAX,
            ..city(2, 0, 0, CityStatus::Expansion)
        };
        let store =
            MemoryStore::from_parts(vec![city(1, 60_000, 10_000, CityStatus::Expansion), huge], vec![], vec![])
                .unwrap();
        let w = ReportingWindow::starting_at(month(2024, 1), 36).unwrap();
        let p = ModelParams::reference();
        let err = aggregate_block(&block(&[1, 2]), &store, &p, &w, AggregateOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidCityData {
                city: CityId(2),
                source: plan_core::ValidationError::PopulationTooLarge { .. },
            }
        ));

        let opts = AggregateOptions {
            on_invalid: FailurePolicy::ExcludeAndReport,
            ..AggregateOptions::default()
        };
        let r = aggregate_block(&block(&[1, 2]), &store, &p, &w, opts).unwrap();
        assert_eq!(r.cities.len(), 1);
        assert_eq!(r.excluded[0].city_id, CityId(2));
    }

    proptest! {
        #[test]
        fn block_totals_are_sum_of_cities(
            pops in proptest::collection::vec((1_000i64..2_000_000, 0i64..=50, -3i64..9), 1..8),
            actual_every in 1usize..5,
        ) {
            let p = ModelParams::reference();
            let start = month(2024, 1);
            let mut cities = Vec::new();
            let mut costs = Vec::new();
            for (i, &(pop, pct, offset)) in pops.iter().enumerate() {
                let id = CityId(i as u32 + 1);
                cities.push(City {
                    id,
                    name: String::new(),
                    population: pop,
                    population_15_to_44: pop * pct / 100,
                    implementation_start: Some(start.add_months(offset).unwrap()),
                    status: CityStatus::Expansion,
                });
                for m in (0..12).step_by(actual_every) {
                    costs.push(RealMonthlyCost {
                        city_id: id,
                        month: start.add_months(m).unwrap(),
                        marketing_cost: Decimal::new(pop / 7, 2),
                        operational_cost: Decimal::new(pop / 11, 2),
                    });
                }
            }
            let ids: Vec<u32> = cities.iter().map(|c| c.id.0).collect();
            let store = MemoryStore::from_parts(cities.clone(), vec![], costs).unwrap();
            let w = ReportingWindow::starting_at(start, 12).unwrap();
            let r = aggregate_block(&block(&ids), &store, &p, &w, AggregateOptions::default()).unwrap();

            // expected figures straight from the projection and reconciliation steps
            let mut rides = 0u64;
            let mut projected = CostPair::ZERO;
            let mut reconciled = CostPair::ZERO;
            let mut revenue = Decimal::ZERO;
            let mut actual = 0usize;
            for c in &cities {
                let series = project_city(c, &w, &p).unwrap();
                let rec = reconcile_series(&series, &store.real_costs(c.id), p.fallback_efficiency_ratio);
                let own = series.totals();
                rides += own.rides;
                projected += own.projected_cost();
                revenue += own.projected_revenue;
                reconciled += rec.months.iter().map(|m| m.reconciled.cost()).sum::<CostPair>();
                actual += rec.actual_months();
            }
            prop_assert_eq!(r.cities.len(), cities.len());
            prop_assert_eq!(r.totals.rides, rides);
            prop_assert_eq!(r.totals.projected_marketing, projected.marketing);
            prop_assert_eq!(r.totals.projected_operational, projected.operational);
            prop_assert_eq!(r.totals.reconciled_marketing, reconciled.marketing);
            prop_assert_eq!(r.totals.reconciled_operational, reconciled.operational);
            prop_assert_eq!(r.totals.revenue, revenue);
            prop_assert_eq!(r.totals.actual_months, actual as u64);
            prop_assert_eq!(r.totals.actual_months + r.totals.estimated_months, 12 * ids.len() as u64);
        }
    }
}
