#![deny(warnings)]

//! Projection model for the expansion planner.
//!
//! This crate provides the pure calculation steps that turn a city record
//! into a month-indexed projection:
//! - [`params`]: versioned model parameters and their validation
//! - [`ramp`]: ramp-up curve from the 15-44 demographic to monthly ride goals
//! - [`tiers`]: population tiers and per-ride unit costs with monthly decay
//! - [`projector`]: cost and revenue series for one city over a window

pub mod params;
pub mod projector;
pub mod ramp;
pub mod tiers;

pub use params::{CostTier, ModelParams, ParamError, MODEL_VERSION};
pub use projector::{project_city, project_month, projected_cost, projected_revenue, CitySeries, SeriesTotals};
pub use ramp::{base_goal, curve_factor, ramp_goal};
pub use tiers::{baseline_unit_costs, decayed_unit_costs, resolve_tier};
