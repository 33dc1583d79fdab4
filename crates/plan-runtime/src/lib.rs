#![deny(warnings)]

//! Planning runtime: reconciliation, block aggregation and the engine that
//! drives the projection pipeline against a store.
//!
//! All calculation is synchronous and free of I/O; the only contact with
//! persisted records goes through [`PlanStore`].

pub mod aggregate;
pub mod engine;
pub mod reconcile;
pub mod store;

pub use aggregate::{
    aggregate_block, AggregateOptions, BlockReport, CityTotals, ExcludedCity, ExclusionReason, FailurePolicy, Kpis,
    StatusFilter, Totals,
};
pub use engine::{PlanningEngine, RecomputeSummary};
pub use reconcile::{reconcile_month, reconcile_series, ReconciledCost, ReconciledMonth, ReconciledSeries};
pub use store::{MemoryStore, PlanStore};
