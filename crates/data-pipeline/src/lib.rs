#![deny(warnings)]

//! Dataset loading for the planner: city records, market blocks and recorded
//! monthly costs read from JSON or YAML, plus a seeded synthetic generator.

use anyhow::{bail, Context, Result};
use plan_core::{
    validate_city, validate_real_cost, City, CityId, CityStatus, MarketBlock, MonthKey, PlanError, RealMonthlyCost,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Structural problems in a dataset.
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("city {0} appears more than once")]
    DuplicateCity(CityId),
    #[error("market block '{0}' appears more than once")]
    DuplicateBlock(String),
    /// A recorded cost names a city the dataset does not contain.
    #[error("cost recorded for {month} references unknown city {city}")]
    DanglingCost { city: CityId, month: MonthKey },
}

/// Everything the planner reads at its boundary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub cities: Vec<City>,
    #[serde(default)]
    pub blocks: Vec<MarketBlock>,
    #[serde(default)]
    pub real_costs: Vec<RealMonthlyCost>,
}

impl Dataset {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing JSON dataset")
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing YAML dataset")
    }

    /// Check identifiers: unique cities and blocks, and every block entry and
    /// cost record naming an existing city. City contents are not inspected.
    pub fn check_references(&self) -> Result<(), DatasetError> {
        let mut ids = BTreeSet::new();
        for c in &self.cities {
            if !ids.insert(c.id) {
                return Err(DatasetError::DuplicateCity(c.id));
            }
        }
        let mut names = BTreeSet::new();
        for b in &self.blocks {
            if !names.insert(b.name.as_str()) {
                return Err(DatasetError::DuplicateBlock(b.name.clone()));
            }
            if let Some(&missing) = b.city_ids.iter().find(|id| !ids.contains(*id)) {
                return Err(PlanError::DanglingReference {
                    block: b.name.clone(),
                    city: missing,
                }
                .into());
            }
        }
        if let Some(r) = self.real_costs.iter().find(|r| !ids.contains(&r.city_id)) {
            return Err(DatasetError::DanglingCost {
                city: r.city_id,
                month: r.month,
            });
        }
        Ok(())
    }

    /// Full check: references plus every city and cost record.
    pub fn validate(&self) -> Result<(), DatasetError> {
        self.check_references()?;
        for c in &self.cities {
            validate_city(c)?;
        }
        for r in &self.real_costs {
            validate_real_cost(r)?;
        }
        Ok(())
    }
}

/// Load a dataset from a `.json`, `.yaml` or `.yml` file.
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let ds = match ext.as_str() {
        "json" => Dataset::from_json_str(&text)?,
        "yaml" | "yml" => Dataset::from_yaml_str(&text)?,
        other => bail!("unsupported dataset extension {other:?} for {}", path.display()),
    };
    info!(
        path = %path.display(),
        cities = ds.cities.len(),
        blocks = ds.blocks.len(),
        real_costs = ds.real_costs.len(),
        "loaded dataset"
    );
    Ok(ds)
}

/// Cities per generated market block.
const SYNTHETIC_BLOCK_SIZE: usize = 10;

/// Deterministic synthetic dataset of `n_cities` cities for benches and demos.
///
/// Launches fall between 2023-01 and 2024-12; about one city in ten is not
/// launched. Roughly half of the first six months after launch carry a
/// recorded cost.
pub fn synthetic_dataset(n_cities: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let first_launch = MonthKey::new(2023, 1).ok();
    let mut ds = Dataset::default();
    for i in 0..n_cities {
        let id = CityId(1_000_000 + i as u32);
        let population: i64 = rng.gen_range(5_000..2_000_000);
        let band_pct: i64 = rng.gen_range(35..50);
        let launch = if rng.gen_bool(0.1) {
            None
        } else {
            first_launch.and_then(|m| m.add_months(rng.gen_range(0..24)).ok())
        };
        let status = match launch {
            None => CityStatus::Planning,
            Some(_) if rng.gen_bool(0.3) => CityStatus::Consolidated,
            Some(_) => CityStatus::Expansion,
        };
        if let Some(start) = launch {
            for k in 0..6 {
                if !rng.gen_bool(0.5) {
                    continue;
                }
                if let Ok(month) = start.add_months(k) {
                    ds.real_costs.push(RealMonthlyCost {
                        city_id: id,
                        month,
                        marketing_cost: Decimal::new(rng.gen_range(10_000..5_000_000), 2),
                        operational_cost: Decimal::new(rng.gen_range(10_000..3_000_000), 2),
                    });
                }
            }
        }
        ds.cities.push(City {
            id,
            name: format!("Synthetic {i}"),
            population,
            population_15_to_44: population * band_pct / 100,
            implementation_start: launch,
            status,
        });
    }
    for (n, chunk) in ds.cities.chunks(SYNTHETIC_BLOCK_SIZE).enumerate() {
        ds.blocks.push(MarketBlock {
            name: format!("block-{n:02}"),
            city_ids: chunk.iter().map(|c| c.id).collect(),
        });
    }
    ds
}
