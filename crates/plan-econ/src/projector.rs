//! Cost and revenue projections for one city over a reporting window.

use crate::params::ModelParams;
use crate::ramp::ramp_goal;
use crate::tiers::{baseline_unit_costs, decayed_unit_costs};
use plan_core::{validate_city, City, CityId, CostPair, MonthKey, MonthlyProjection, PlanError, ReportingWindow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::Add;
use tracing::debug;

/// Projected marketing and operational cost for `rides` rides in a month.
pub fn projected_cost(population: i64, rides: u64, months_since_launch: i64, params: &ModelParams) -> CostPair {
    let unit = decayed_unit_costs(baseline_unit_costs(population, params), months_since_launch, params);
    let rides = Decimal::from(rides);
    CostPair::new(rides * unit.marketing, rides * unit.operational)
}

/// Projected revenue for `rides` rides.
pub fn projected_revenue(rides: u64, params: &ModelParams) -> Decimal {
    Decimal::from(rides) * params.revenue_per_ride
}

/// Projection for a single month of an already validated city.
pub fn project_month(city: &City, month: MonthKey, params: &ModelParams) -> MonthlyProjection {
    let k = city.months_since_launch(month);
    let band = u64::try_from(city.population_15_to_44).unwrap_or(0);
    let rides = ramp_goal(band, k, params);
    let cost = projected_cost(city.population, rides, k, params);
    MonthlyProjection {
        month,
        months_since_launch: k,
        rides,
        projected_marketing: cost.marketing,
        projected_operational: cost.operational,
        projected_revenue: projected_revenue(rides, params),
    }
}

/// Month-by-month projection of one city.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CitySeries {
    pub city_id: CityId,
    /// One entry per window month, in calendar order.
    pub months: Vec<MonthlyProjection>,
}

impl CitySeries {
    pub fn get(&self, month: MonthKey) -> Option<&MonthlyProjection> {
        self.months.iter().find(|m| m.month == month)
    }

    /// Totals over the whole series.
    pub fn totals(&self) -> SeriesTotals {
        self.months.iter().sum()
    }

    /// Totals from the start of the series through `month` inclusive.
    pub fn cumulative_through(&self, month: MonthKey) -> SeriesTotals {
        self.months.iter().take_while(|m| m.month <= month).sum()
    }
}

/// Summed projection fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTotals {
    pub rides: u64,
    pub projected_marketing: Decimal,
    pub projected_operational: Decimal,
    pub projected_revenue: Decimal,
}

impl SeriesTotals {
    pub fn projected_cost(&self) -> CostPair {
        CostPair::new(self.projected_marketing, self.projected_operational)
    }
}

impl Add for SeriesTotals {
    type Output = SeriesTotals;

    fn add(self, rhs: SeriesTotals) -> SeriesTotals {
        SeriesTotals {
            rides: self.rides + rhs.rides,
            projected_marketing: self.projected_marketing + rhs.projected_marketing,
            projected_operational: self.projected_operational + rhs.projected_operational,
            projected_revenue: self.projected_revenue + rhs.projected_revenue,
        }
    }
}

impl<'a> Sum<&'a MonthlyProjection> for SeriesTotals {
    fn sum<I: Iterator<Item = &'a MonthlyProjection>>(iter: I) -> Self {
        iter.fold(SeriesTotals::default(), |acc, m| SeriesTotals {
            rides: acc.rides + m.rides,
            projected_marketing: acc.projected_marketing + m.projected_marketing,
            projected_operational: acc.projected_operational + m.projected_operational,
            projected_revenue: acc.projected_revenue + m.projected_revenue,
        })
    }
}

impl Sum for SeriesTotals {
    fn sum<I: Iterator<Item = SeriesTotals>>(iter: I) -> Self {
        iter.fold(SeriesTotals::default(), |acc, t| acc + t)
    }
}

/// Validate `city` and project every month of `window`.
pub fn project_city(city: &City, window: &ReportingWindow, params: &ModelParams) -> Result<CitySeries, PlanError> {
    validate_city(city)?;
    let months: Vec<MonthlyProjection> = window.months().map(|m| project_month(city, m, params)).collect();
    debug!(city = %city.id, months = months.len(), start = %window.start(), "projected city series");
    Ok(CitySeries {
        city_id: city.id,
        months,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_core::{CityStatus, ValidationError};
    use proptest::prelude::*;

    fn city(population: i64, band: i64, launch: Option<MonthKey>) -> City {
        City {
            id: CityId(4205407),
            name: "Test".to_string(),
            population,
            population_15_to_44: band,
            implementation_start: launch,
            status: CityStatus::Expansion,
        }
    }

    fn month(y: i32, m: u32) -> MonthKey {
        MonthKey::new(y, m).unwrap()
    }

    #[test]
    fn worked_example_launch_month() {
        let p = ModelParams::reference();
        let c = city(60_000, 10_000, Some(month(2024, 1)));
        let m = project_month(&c, month(2024, 1), &p);
        assert_eq!(m.months_since_launch, 1);
        assert_eq!(m.rides, 45);
        assert_eq!(m.projected_marketing, Decimal::new(270, 0));
        assert_eq!(m.projected_operational, Decimal::new(180, 0));
        assert_eq!(m.projected_revenue, Decimal::new(3375, 1));
    }

    #[test]
    fn second_month_uses_decayed_costs() {
        let p = ModelParams::reference();
        let c = city(60_000, 10_000, Some(month(2024, 1)));
        let m = project_month(&c, month(2024, 2), &p);
        // 1000 * 0.10 = 100 rides; 100 * 5.4 and 100 * 3.68
        assert_eq!(m.rides, 100);
        assert_eq!(m.projected_marketing, Decimal::new(540, 0));
        assert_eq!(m.projected_operational, Decimal::new(368, 0));
        assert_eq!(m.projected_revenue, Decimal::new(750, 0));
    }

    #[test]
    fn months_before_launch_are_zero() {
        let p = ModelParams::reference();
        let c = city(60_000, 10_000, Some(month(2024, 6)));
        let w = ReportingWindow::new(month(2024, 1), month(2024, 12)).unwrap();
        let s = project_city(&c, &w, &p).unwrap();
        assert_eq!(s.months.len(), 12);
        for m in s.months.iter().take(5) {
            assert_eq!(m.rides, 0);
            assert_eq!(m.projected_cost(), CostPair::ZERO);
            assert_eq!(m.projected_revenue, Decimal::ZERO);
        }
        assert_eq!(s.get(month(2024, 6)).unwrap().rides, 45);
        assert_eq!(s.get(month(2024, 12)).unwrap().rides, 1_000);
    }

    #[test]
    fn unlaunched_city_projects_nothing() {
        let p = ModelParams::reference();
        let c = city(500_000, 200_000, None);
        let w = ReportingWindow::starting_at(month(2024, 1), 24).unwrap();
        let s = project_city(&c, &w, &p).unwrap();
        assert_eq!(s.totals(), SeriesTotals::default());
    }

    #[test]
    fn invalid_city_is_rejected() {
        let p = ModelParams::reference();
        let c = city(1_000, 2_000, Some(month(2024, 1)));
        let w = ReportingWindow::starting_at(month(2024, 1), 3).unwrap();
        let err = project_city(&c, &w, &p).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InvalidCityData {
                source: ValidationError::BandExceedsPopulation { .. },
                ..
            }
        ));
    }

    #[test]
    fn cumulative_through_month() {
        let p = ModelParams::reference();
        let c = city(60_000, 10_000, Some(month(2024, 1)));
        let w = ReportingWindow::starting_at(month(2024, 1), 12).unwrap();
        let s = project_city(&c, &w, &p).unwrap();
        let first_two = s.cumulative_through(month(2024, 2));
        assert_eq!(first_two.rides, 145);
        assert_eq!(first_two.projected_marketing, Decimal::new(810, 0));
        assert_eq!(s.cumulative_through(month(2024, 12)), s.totals());
    }

    proptest! {
        #[test]
        fn cumulative_equals_sum_of_months(
            pop in 0i64..3_000_000,
            pct in 0i64..=60,
            launch_offset in -6i64..18,
            len in 1u32..36,
        ) {
            let p = ModelParams::reference();
            let start = month(2023, 1);
            let c = city(pop, pop * pct / 100, Some(start.add_months(launch_offset).unwrap()));
            let w = ReportingWindow::starting_at(start, len).unwrap();
            let s = project_city(&c, &w, &p).unwrap();
            let t = s.totals();

            let mut rides = 0u64;
            let mut marketing = Decimal::ZERO;
            let mut operational = Decimal::ZERO;
            let mut revenue = Decimal::ZERO;
            for m in w.months() {
                let single = project_month(&c, m, &p);
                rides += single.rides;
                marketing += single.projected_marketing;
                operational += single.projected_operational;
                revenue += single.projected_revenue;
            }
            prop_assert_eq!(t.rides, rides);
            prop_assert_eq!(t.projected_marketing, marketing);
            prop_assert_eq!(t.projected_operational, operational);
            prop_assert_eq!(t.projected_revenue, revenue);
        }
    }
}
