#![deny(warnings)]

//! Persistence layer: SQLite storage for cities, recorded costs and planning results.
//!
//! Decimals are stored as canonical text so values round-trip exactly.

use plan_core::{City, CityId, CityStatus, CostPair, MonthKey, MonthlyProjection, PlanningResult, RealMonthlyCost};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// A stored value could not be converted back into a domain value.
    #[error("corrupt record: {0}")]
    Decode(String),
}

/// Returns the default SQLite URL used for local planning databases.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/planner.db"
}

/// Open (creating if needed) the database at `url` and apply migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool, StoreError> {
    let opts = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    // each connection to an in-memory database sees its own database
    let max = if url.contains(":memory:") { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max)
        .connect_with(opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

fn decode(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Decode(format!("{what}: {e}"))
}

fn parse_decimal(row: &SqliteRow, col: &str) -> Result<Decimal, StoreError> {
    let text: String = row.try_get(col)?;
    Decimal::from_str(&text).map_err(|e| decode(col, e))
}

fn parse_month(row: &SqliteRow, col: &str) -> Result<MonthKey, StoreError> {
    let text: String = row.try_get(col)?;
    text.parse().map_err(|e| decode(col, e))
}

fn city_id_param(id: CityId) -> i64 {
    i64::from(id.0)
}

fn city_from_row(row: &SqliteRow) -> Result<City, StoreError> {
    let id: i64 = row.try_get("id")?;
    let start: Option<String> = row.try_get("implementation_start")?;
    let status: String = row.try_get("status")?;
    Ok(City {
        id: CityId(u32::try_from(id).map_err(|e| decode("id", e))?),
        name: row.try_get("name")?,
        population: row.try_get("population")?,
        population_15_to_44: row.try_get("population_15_to_44")?,
        implementation_start: start
            .map(|s| s.parse::<MonthKey>())
            .transpose()
            .map_err(|e| decode("implementation_start", e))?,
        status: status.parse::<CityStatus>().map_err(|e| decode("status", e))?,
    })
}

/// Insert or update a city record.
pub async fn upsert_city(pool: &SqlitePool, city: &City) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO cities (id, name, population, population_15_to_44, implementation_start, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, population = excluded.population, \
         population_15_to_44 = excluded.population_15_to_44, \
         implementation_start = excluded.implementation_start, status = excluded.status",
    )
    .bind(city_id_param(city.id))
    .bind(&city.name)
    .bind(city.population)
    .bind(city.population_15_to_44)
    .bind(city.implementation_start.map(|m| m.to_string()))
    .bind(city.status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_city(pool: &SqlitePool, id: CityId) -> Result<Option<City>, StoreError> {
    let row = sqlx::query(
        "SELECT id, name, population, population_15_to_44, implementation_start, status \
         FROM cities WHERE id = ?1",
    )
    .bind(city_id_param(id))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(city_from_row).transpose()
}

pub async fn load_cities(pool: &SqlitePool) -> Result<Vec<City>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, name, population, population_15_to_44, implementation_start, status \
         FROM cities ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(city_from_row).collect()
}

/// Record (or overwrite) the actual cost of a city-month.
pub async fn record_real_cost(pool: &SqlitePool, cost: &RealMonthlyCost) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO real_monthly_costs (city_id, month, marketing_cost, operational_cost) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(city_id, month) DO UPDATE SET marketing_cost = excluded.marketing_cost, \
         operational_cost = excluded.operational_cost",
    )
    .bind(city_id_param(cost.city_id))
    .bind(cost.month.to_string())
    .bind(cost.marketing_cost.to_string())
    .bind(cost.operational_cost.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_real_costs(pool: &SqlitePool, id: CityId) -> Result<BTreeMap<MonthKey, CostPair>, StoreError> {
    let rows = sqlx::query(
        "SELECT month, marketing_cost, operational_cost FROM real_monthly_costs \
         WHERE city_id = ?1 ORDER BY month",
    )
    .bind(city_id_param(id))
    .fetch_all(pool)
    .await?;
    let mut out = BTreeMap::new();
    for row in &rows {
        out.insert(
            parse_month(row, "month")?,
            CostPair::new(parse_decimal(row, "marketing_cost")?, parse_decimal(row, "operational_cost")?),
        );
    }
    Ok(out)
}

/// Replace the stored planning result of a city in a single transaction.
///
/// Previous months are removed; recorded costs carried by `result` are upserted.
pub async fn save_planning_result(pool: &SqlitePool, result: &PlanningResult) -> Result<(), StoreError> {
    let city = city_id_param(result.city_id);
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM planning_months WHERE city_id = ?1")
        .bind(city)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO planning_results (city_id, model_version) VALUES (?1, ?2) \
         ON CONFLICT(city_id) DO UPDATE SET model_version = excluded.model_version",
    )
    .bind(city)
    .bind(&result.model_version)
    .execute(&mut *tx)
    .await?;
    for m in result.results.values() {
        let rides = i64::try_from(m.rides).map_err(|e| decode("rides", e))?;
        sqlx::query(
            "INSERT INTO planning_months (city_id, month, months_since_launch, rides, \
             projected_marketing, projected_operational, projected_revenue) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(city)
        .bind(m.month.to_string())
        .bind(m.months_since_launch)
        .bind(rides)
        .bind(m.projected_marketing.to_string())
        .bind(m.projected_operational.to_string())
        .bind(m.projected_revenue.to_string())
        .execute(&mut *tx)
        .await?;
    }
    for (month, cost) in &result.real_monthly_costs {
        sqlx::query(
            "INSERT INTO real_monthly_costs (city_id, month, marketing_cost, operational_cost) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(city_id, month) DO UPDATE SET marketing_cost = excluded.marketing_cost, \
             operational_cost = excluded.operational_cost",
        )
        .bind(city)
        .bind(month.to_string())
        .bind(cost.marketing.to_string())
        .bind(cost.operational.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    debug!(city = %result.city_id, months = result.results.len(), "saved planning result");
    Ok(())
}

/// Load a city's planning result together with every cost recorded so far.
pub async fn load_planning_result(pool: &SqlitePool, id: CityId) -> Result<Option<PlanningResult>, StoreError> {
    let head = sqlx::query("SELECT model_version FROM planning_results WHERE city_id = ?1")
        .bind(city_id_param(id))
        .fetch_optional(pool)
        .await?;
    let Some(head) = head else {
        return Ok(None);
    };
    let rows = sqlx::query(
        "SELECT month, months_since_launch, rides, projected_marketing, projected_operational, \
         projected_revenue FROM planning_months WHERE city_id = ?1 ORDER BY month",
    )
    .bind(city_id_param(id))
    .fetch_all(pool)
    .await?;
    let mut results = BTreeMap::new();
    for row in &rows {
        let month = parse_month(row, "month")?;
        let rides: i64 = row.try_get("rides")?;
        results.insert(
            month,
            MonthlyProjection {
                month,
                months_since_launch: row.try_get("months_since_launch")?,
                rides: u64::try_from(rides).map_err(|e| decode("rides", e))?,
                projected_marketing: parse_decimal(row, "projected_marketing")?,
                projected_operational: parse_decimal(row, "projected_operational")?,
                projected_revenue: parse_decimal(row, "projected_revenue")?,
            },
        );
    }
    Ok(Some(PlanningResult {
        city_id: id,
        model_version: head.try_get("model_version")?,
        results,
        real_monthly_costs: load_real_costs(pool, id).await?,
    }))
}
