//! Narrow read/write boundary between the engine and its persistence collaborator.

use plan_core::{
    validate_real_cost, City, CityId, CostPair, MarketBlock, MonthKey, PlanError, PlanningResult, RealMonthlyCost,
};
use std::collections::BTreeMap;

/// Records the engine reads before computing and writes after.
///
/// Implementations must make `replace_planning_result` all-or-nothing: readers
/// see either the previous result or the new one, never a mix.
pub trait PlanStore {
    fn city(&self, id: CityId) -> Option<City>;

    /// Identifiers of every stored city, ascending.
    fn city_ids(&self) -> Vec<CityId>;

    fn block(&self, name: &str) -> Option<MarketBlock>;

    /// Recorded costs for a city, keyed by month.
    fn real_costs(&self, id: CityId) -> BTreeMap<MonthKey, CostPair>;

    fn planning_result(&self, id: CityId) -> Option<PlanningResult>;

    fn replace_planning_result(&mut self, result: PlanningResult);
}

/// In-memory store used by the CLI and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    cities: BTreeMap<CityId, City>,
    blocks: BTreeMap<String, MarketBlock>,
    real_costs: BTreeMap<CityId, BTreeMap<MonthKey, CostPair>>,
    results: BTreeMap<CityId, PlanningResult>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loaded records; later cost records for the same month win.
    ///
    /// Fails on the first invalid cost record.
    pub fn from_parts(
        cities: Vec<City>,
        blocks: Vec<MarketBlock>,
        real_costs: Vec<RealMonthlyCost>,
    ) -> Result<Self, PlanError> {
        let mut store = Self::new();
        for c in cities {
            store.insert_city(c);
        }
        for b in blocks {
            store.insert_block(b);
        }
        for r in &real_costs {
            store.record_real_cost(r)?;
        }
        Ok(store)
    }

    pub fn insert_city(&mut self, city: City) {
        self.cities.insert(city.id, city);
    }

    pub fn insert_block(&mut self, block: MarketBlock) {
        self.blocks.insert(block.name.clone(), block);
    }

    /// Record an actual cost, replacing any earlier record for the same month.
    pub fn record_real_cost(&mut self, cost: &RealMonthlyCost) -> Result<(), PlanError> {
        validate_real_cost(cost)?;
        self.real_costs
            .entry(cost.city_id)
            .or_default()
            .insert(cost.month, cost.cost());
        Ok(())
    }

    pub fn blocks(&self) -> impl Iterator<Item = &MarketBlock> {
        self.blocks.values()
    }

    pub fn cities(&self) -> impl Iterator<Item = &City> {
        self.cities.values()
    }
}

impl PlanStore for MemoryStore {
    fn city(&self, id: CityId) -> Option<City> {
        self.cities.get(&id).cloned()
    }

    fn city_ids(&self) -> Vec<CityId> {
        self.cities.keys().copied().collect()
    }

    fn block(&self, name: &str) -> Option<MarketBlock> {
        self.blocks.get(name).cloned()
    }

    fn real_costs(&self, id: CityId) -> BTreeMap<MonthKey, CostPair> {
        self.real_costs.get(&id).cloned().unwrap_or_default()
    }

    fn planning_result(&self, id: CityId) -> Option<PlanningResult> {
        self.results.get(&id).cloned()
    }

    fn replace_planning_result(&mut self, result: PlanningResult) {
        self.results.insert(result.city_id, result);
    }
}
