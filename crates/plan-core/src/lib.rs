#![deny(warnings)]

//! Core domain records and invariants for the expansion planner.
//!
//! This crate defines the serializable types shared by the projection engine,
//! the dataset loader and the storage adapter, together with the validation
//! helpers that guard their invariants.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

/// Stable city identifier (statistical-agency municipality code).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CityId(pub u32);

impl fmt::Display for CityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service status of a city.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CityStatus {
    /// Not served and not planned.
    NotServed,
    /// Launch is being planned.
    Planning,
    /// Ramp-up in progress.
    Expansion,
    /// Past ramp-up, steady operation.
    Consolidated,
}

impl CityStatus {
    /// Whether the city takes part in a block's active projection.
    pub fn is_active(self) -> bool {
        matches!(self, CityStatus::Expansion | CityStatus::Consolidated)
    }

    /// Wire name, e.g. `EXPANSION`.
    pub fn as_str(self) -> &'static str {
        match self {
            CityStatus::NotServed => "NOT_SERVED",
            CityStatus::Planning => "PLANNING",
            CityStatus::Expansion => "EXPANSION",
            CityStatus::Consolidated => "CONSOLIDATED",
        }
    }
}

impl fmt::Display for CityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CityStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_SERVED" => Ok(CityStatus::NotServed),
            "PLANNING" => Ok(CityStatus::Planning),
            "EXPANSION" => Ok(CityStatus::Expansion),
            "CONSOLIDATED" => Ok(CityStatus::Consolidated),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Calendar month, written `YYYY-MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// First supported year.
    pub const MIN_YEAR: i32 = 1970;
    /// Last supported year.
    pub const MAX_YEAR: i32 = 2100;

    /// Month `month` (1-12) of `year`, rejecting values outside the supported range.
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(ValidationError::YearOutOfRange(year));
        }
        if !(1..=12).contains(&month) {
            return Err(ValidationError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    /// Calendar year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Month of the year, 1-12.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// Month containing `date`.
    pub fn from_date(date: NaiveDate) -> Result<Self, ValidationError> {
        Self::new(date.year(), date.month())
    }

    /// First calendar day of the month.
    pub fn first_day(&self) -> NaiveDate {
        // Always valid within the supported year range.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Months elapsed since January of year 0; used for month arithmetic.
    pub fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    /// Inverse of [`MonthKey::ordinal`].
    pub fn from_ordinal(ordinal: i64) -> Result<Self, ValidationError> {
        let year = ordinal.div_euclid(12);
        let month = ordinal.rem_euclid(12) + 1;
        let year = i32::try_from(year).map_err(|_| ValidationError::YearOutOfRange(i32::MAX))?;
        Self::new(year, month as u32)
    }

    /// Shift by `months` (negative moves backwards).
    pub fn add_months(self, months: i64) -> Result<Self, ValidationError> {
        Self::from_ordinal(self.ordinal() + months)
    }

    /// Whole months from `earlier` to `self` (negative when `earlier` is later).
    pub fn months_since(self, earlier: MonthKey) -> i64 {
        self.ordinal() - earlier.ordinal()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::MalformedMonthKey(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(malformed)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(malformed());
        }
        let year: i32 = y.parse().map_err(|_| malformed())?;
        let month: u32 = m.parse().map_err(|_| malformed())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(value: MonthKey) -> Self {
        value.to_string()
    }
}

/// Inclusive range of calendar months used for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReportingWindow {
    start: MonthKey,
    end: MonthKey,
}

impl ReportingWindow {
    /// Window from `start` through `end`; fails when `end` precedes `start`.
    pub fn new(start: MonthKey, end: MonthKey) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::WindowInverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window of `months` months beginning at `start` (at least one month).
    pub fn starting_at(start: MonthKey, months: u32) -> Result<Self, ValidationError> {
        let end = start.add_months(i64::from(months.max(1)) - 1)?;
        Self::new(start, end)
    }

    /// First month, inclusive.
    pub fn start(&self) -> MonthKey {
        self.start
    }

    /// Last month, inclusive.
    pub fn end(&self) -> MonthKey {
        self.end
    }

    /// Number of months covered.
    pub fn len(&self) -> usize {
        (self.end.months_since(self.start) + 1) as usize
    }

    /// Always false; a window covers at least one month.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `month` falls inside the window.
    pub fn contains(&self, month: MonthKey) -> bool {
        self.start <= month && month <= self.end
    }

    /// Months in calendar order.
    pub fn months(&self) -> impl Iterator<Item = MonthKey> {
        (self.start.ordinal()..=self.end.ordinal()).filter_map(|o| MonthKey::from_ordinal(o).ok())
    }
}

impl<'de> Deserialize<'de> for ReportingWindow {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Bounds {
            start: MonthKey,
            end: MonthKey,
        }
        let b = Bounds::deserialize(deserializer)?;
        Self::new(b.start, b.end).map_err(serde::de::Error::custom)
    }
}

/// A municipality under consideration or in service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct City {
    /// Statistical-agency code.
    pub id: CityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Total population (>= 0).
    pub population: i64,
    /// Population aged 15-44, the addressable rider demographic.
    pub population_15_to_44: i64,
    /// First month of ramp-up; `None` while not launched.
    #[serde(default)]
    pub implementation_start: Option<MonthKey>,
    /// Service status; decides eligibility for active projections.
    pub status: CityStatus,
}

impl City {
    /// Largest accepted population; keeps ride and money totals in range.
    pub const MAX_POPULATION: i64 = 10_000_000_000;

    /// 1-based month index of `month` relative to launch; 0 when not launched.
    ///
    /// The launch month is month 1, months before it are <= 0.
    pub fn months_since_launch(&self, month: MonthKey) -> i64 {
        match self.implementation_start {
            Some(start) => month.months_since(start) + 1,
            None => 0,
        }
    }
}

/// Named group of cities reported on jointly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBlock {
    /// Unique block name.
    pub name: String,
    /// Member cities, in reporting order.
    pub city_ids: Vec<CityId>,
}

/// Marketing and operational amounts for one city-month.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPair {
    /// Marketing spend.
    pub marketing: Decimal,
    /// Operational spend.
    pub operational: Decimal,
}

impl CostPair {
    pub const ZERO: CostPair = CostPair {
        marketing: Decimal::ZERO,
        operational: Decimal::ZERO,
    };

    pub fn new(marketing: Decimal, operational: Decimal) -> Self {
        Self {
            marketing,
            operational,
        }
    }

    pub fn total(&self) -> Decimal {
        self.marketing + self.operational
    }

    /// Both components multiplied by `ratio`.
    pub fn scaled(&self, ratio: Decimal) -> Self {
        Self {
            marketing: self.marketing * ratio,
            operational: self.operational * ratio,
        }
    }
}

impl Add for CostPair {
    type Output = CostPair;

    fn add(self, rhs: CostPair) -> CostPair {
        CostPair {
            marketing: self.marketing + rhs.marketing,
            operational: self.operational + rhs.operational,
        }
    }
}

impl AddAssign for CostPair {
    fn add_assign(&mut self, rhs: CostPair) {
        self.marketing += rhs.marketing;
        self.operational += rhs.operational;
    }
}

impl Sum for CostPair {
    fn sum<I: Iterator<Item = CostPair>>(iter: I) -> Self {
        iter.fold(CostPair::ZERO, |acc, c| acc + c)
    }
}

/// Projected figures for one city-month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyProjection {
    pub month: MonthKey,
    /// 1-based index relative to launch; <= 0 before launch.
    pub months_since_launch: i64,
    /// Ride-count goal.
    pub rides: u64,
    /// Rides times the decayed marketing unit cost.
    pub projected_marketing: Decimal,
    /// Rides times the decayed operational unit cost.
    pub projected_operational: Decimal,
    /// Rides times the revenue per ride.
    pub projected_revenue: Decimal,
}

impl MonthlyProjection {
    pub fn projected_cost(&self) -> CostPair {
        CostPair::new(self.projected_marketing, self.projected_operational)
    }
}

/// Cost actually incurred by a city in a month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealMonthlyCost {
    pub city_id: CityId,
    /// Month the cost was incurred in.
    pub month: MonthKey,
    /// Recorded marketing spend (>= 0).
    pub marketing_cost: Decimal,
    /// Recorded operational spend (>= 0).
    pub operational_cost: Decimal,
}

impl RealMonthlyCost {
    pub fn cost(&self) -> CostPair {
        CostPair::new(self.marketing_cost, self.operational_cost)
    }
}

/// Persisted planning output for one city.
///
/// Always written as a whole: a recomputation replaces every month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningResult {
    pub city_id: CityId,
    /// Version tag of the model parameters that produced `results`.
    pub model_version: String,
    /// Projection per window month.
    pub results: BTreeMap<MonthKey, MonthlyProjection>,
    /// Recorded costs known when the result was computed.
    #[serde(default)]
    pub real_monthly_costs: BTreeMap<MonthKey, CostPair>,
}

/// Field-level validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Population counts cannot be negative.
    #[error("{field} must be non-negative, got {value}")]
    NegativePopulation { field: &'static str, value: i64 },
    /// Population above [`City::MAX_POPULATION`].
    #[error("population {value} exceeds the supported maximum {max}")]
    PopulationTooLarge { value: i64, max: i64 },
    /// The 15-44 band is a subset of the total population.
    #[error("population 15-44 ({band}) exceeds total population ({population})")]
    BandExceedsPopulation { band: i64, population: i64 },
    /// Year outside [1970, 2100].
    #[error("year {0} is out of supported range [1970, 2100]")]
    YearOutOfRange(i32),
    /// Month outside [1, 12].
    #[error("month {0} is out of range [1, 12]")]
    MonthOutOfRange(u32),
    /// Text is not of the form `YYYY-MM`.
    #[error("malformed month key: {0:?}")]
    MalformedMonthKey(String),
    /// Window end precedes its start.
    #[error("window end {end} precedes start {start}")]
    WindowInverted { start: MonthKey, end: MonthKey },
    /// Recorded costs must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// Status text is not one of the known values.
    #[error("unknown city status: {0:?}")]
    UnknownStatus(String),
}

/// Errors surfaced by the planning engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A city record violates its invariants.
    #[error("invalid data for city {city}: {source}")]
    InvalidCityData {
        city: CityId,
        #[source]
        source: ValidationError,
    },
    /// A market block names a city that does not exist.
    #[error("market block '{block}' references unknown city {city}")]
    DanglingReference { block: String, city: CityId },
    /// No city record exists for the identifier.
    #[error("unknown city {0}")]
    UnknownCity(CityId),
    /// The requested reporting window is unusable.
    #[error("invalid reporting window: {0}")]
    InvalidWindow(#[source] ValidationError),
}

impl PlanError {
    /// City the error is about, if any.
    pub fn city(&self) -> Option<CityId> {
        match self {
            PlanError::InvalidCityData { city, .. }
            | PlanError::DanglingReference { city, .. }
            | PlanError::UnknownCity(city) => Some(*city),
            PlanError::InvalidWindow(_) => None,
        }
    }
}

/// Validate a city record.
pub fn validate_city(city: &City) -> Result<(), PlanError> {
    let invalid = |source| PlanError::InvalidCityData {
        city: city.id,
        source,
    };
    if city.population < 0 {
        return Err(invalid(ValidationError::NegativePopulation {
            field: "population",
            value: city.population,
        }));
    }
    if city.population_15_to_44 < 0 {
        return Err(invalid(ValidationError::NegativePopulation {
            field: "population_15_to_44",
            value: city.population_15_to_44,
        }));
    }
    if city.population > City::MAX_POPULATION {
        return Err(invalid(ValidationError::PopulationTooLarge {
            value: city.population,
            max: City::MAX_POPULATION,
        }));
    }
    if city.population_15_to_44 > city.population {
        return Err(invalid(ValidationError::BandExceedsPopulation {
            band: city.population_15_to_44,
            population: city.population,
        }));
    }
    Ok(())
}

/// Validate a recorded cost.
pub fn validate_real_cost(cost: &RealMonthlyCost) -> Result<(), PlanError> {
    if cost.marketing_cost < Decimal::ZERO || cost.operational_cost < Decimal::ZERO {
        return Err(PlanError::InvalidCityData {
            city: cost.city_id,
            source: ValidationError::NegativeMoney,
        });
    }
    Ok(())
}
