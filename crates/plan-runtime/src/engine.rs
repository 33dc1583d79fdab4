//! Planning engine: runs the projection pipeline against a [`PlanStore`].

use crate::aggregate::{aggregate_block, AggregateOptions, BlockReport};
use crate::reconcile::{reconcile_series, ReconciledSeries};
use crate::store::PlanStore;
use plan_core::{City, CityId, CostPair, MarketBlock, MonthKey, PlanError, PlanningResult, ReportingWindow};
use plan_econ::{project_city, ModelParams, ParamError};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of recomputing many cities; failures do not affect other cities.
#[derive(Debug, Default)]
pub struct RecomputeSummary {
    pub updated: Vec<CityId>,
    pub failed: Vec<(CityId, PlanError)>,
}

/// Projection pipeline bound to one validated parameter set.
#[derive(Clone, Debug)]
pub struct PlanningEngine {
    params: ModelParams,
}

impl PlanningEngine {
    pub fn new(params: ModelParams) -> Result<Self, ParamError> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Engine with the reference parameter tables.
    pub fn reference() -> Self {
        Self {
            params: ModelParams::reference(),
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Build the full planning result for one city without touching any store.
    pub fn compute_result(
        &self,
        city: &City,
        real_costs: BTreeMap<MonthKey, CostPair>,
        window: &ReportingWindow,
    ) -> Result<PlanningResult, PlanError> {
        let series = project_city(city, window, &self.params)?;
        let results = series.months.into_iter().map(|m| (m.month, m)).collect();
        Ok(PlanningResult {
            city_id: city.id,
            model_version: self.params.version.clone(),
            results,
            real_monthly_costs: real_costs,
        })
    }

    /// Recompute one city and replace its stored result.
    ///
    /// The result is fully built before the store is written; on error the
    /// stored result is left untouched.
    pub fn recompute_city<S: PlanStore + ?Sized>(
        &self,
        store: &mut S,
        id: CityId,
        window: &ReportingWindow,
    ) -> Result<PlanningResult, PlanError> {
        let city = store.city(id).ok_or(PlanError::UnknownCity(id))?;
        let result = self.compute_result(&city, store.real_costs(id), window)?;
        store.replace_planning_result(result.clone());
        debug!(city = %id, months = result.results.len(), version = %result.model_version, "replaced planning result");
        Ok(result)
    }

    /// Recompute every stored city, collecting failures per city.
    pub fn recompute_all<S: PlanStore + ?Sized>(&self, store: &mut S, window: &ReportingWindow) -> RecomputeSummary {
        let mut summary = RecomputeSummary::default();
        for id in store.city_ids() {
            match self.recompute_city(store, id, window) {
                Ok(_) => summary.updated.push(id),
                Err(e) => {
                    warn!(city = %id, error = %e, "planning result not updated");
                    summary.failed.push((id, e));
                }
            }
        }
        info!(
            updated = summary.updated.len(),
            failed = summary.failed.len(),
            start = %window.start(),
            end = %window.end(),
            "recomputed planning results"
        );
        summary
    }

    /// Projected series for one city reconciled against its stored actuals.
    pub fn reconciled_series<S: PlanStore + ?Sized>(
        &self,
        store: &S,
        id: CityId,
        window: &ReportingWindow,
    ) -> Result<ReconciledSeries, PlanError> {
        let city = store.city(id).ok_or(PlanError::UnknownCity(id))?;
        let series = project_city(&city, window, &self.params)?;
        Ok(reconcile_series(&series, &store.real_costs(id), self.params.fallback_efficiency_ratio))
    }

    /// Aggregate a block over `window`.
    pub fn block_report<S: PlanStore + ?Sized>(
        &self,
        store: &S,
        block: &MarketBlock,
        window: &ReportingWindow,
        options: AggregateOptions,
    ) -> Result<BlockReport, PlanError> {
        aggregate_block(block, store, &self.params, window, options)
    }

    /// Window starting at the earliest launch among the block's cities,
    /// spanning the configured default length.
    ///
    /// `None` when no city of the block has launched.
    pub fn default_window<S: PlanStore + ?Sized>(
        &self,
        store: &S,
        block: &MarketBlock,
    ) -> Result<Option<ReportingWindow>, PlanError> {
        let earliest = block
            .city_ids
            .iter()
            .filter_map(|&id| store.city(id))
            .filter_map(|c| c.implementation_start)
            .min();
        earliest
            .map(|start| ReportingWindow::starting_at(start, self.params.default_window_months))
            .transpose()
            .map_err(PlanError::InvalidWindow)
    }
}
