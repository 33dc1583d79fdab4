#![deny(warnings)]

//! Headless CLI: load a dataset, project and reconcile market blocks, and
//! optionally persist the per-city planning results.

use anyhow::{bail, Context, Result};
use data_pipeline::{load_dataset, synthetic_dataset, Dataset};
use plan_core::{CityId, MarketBlock, MonthKey, ReportingWindow};
use plan_econ::ModelParams;
use plan_runtime::{
    AggregateOptions, BlockReport, ExclusionReason, FailurePolicy, MemoryStore, PlanStore, PlanningEngine,
    StatusFilter,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: plan-cli (--dataset <file> | --synthetic <n>) [--params <yaml>] [--block <name>] \
[--from YYYY-MM] [--to YYYY-MM] [--all-statuses] [--exclude-invalid] [--json] [--db <url>] [--version]";

/// Seed for `--synthetic` datasets.
const SYNTHETIC_SEED: u64 = 42;

#[derive(Debug, Default)]
struct Args {
    dataset: Option<PathBuf>,
    synthetic: Option<usize>,
    params: Option<PathBuf>,
    block: Option<String>,
    from: Option<MonthKey>,
    to: Option<MonthKey>,
    all_statuses: bool,
    exclude_invalid: bool,
    json: bool,
    db: Option<String>,
    version: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = || it.next().with_context(|| format!("{arg} needs a value\n{USAGE}"));
        match arg.as_str() {
            "--dataset" => args.dataset = Some(PathBuf::from(value()?)),
            "--synthetic" => args.synthetic = Some(value()?.parse().context("--synthetic")?),
            "--params" => args.params = Some(PathBuf::from(value()?)),
            "--block" => args.block = Some(value()?),
            "--from" => args.from = Some(value()?.parse().context("--from")?),
            "--to" => args.to = Some(value()?.parse().context("--to")?),
            "--db" => args.db = Some(value()?),
            "--all-statuses" => args.all_statuses = true,
            "--exclude-invalid" => args.exclude_invalid = true,
            "--json" => args.json = true,
            "--version" => args.version = true,
            other => bail!("unknown argument {other:?}\n{USAGE}"),
        }
    }
    Ok(args)
}

fn load_params(args: &Args) -> Result<ModelParams> {
    match &args.params {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(ModelParams::from_yaml_str(&text)?)
        }
        None => Ok(ModelParams::reference()),
    }
}

fn load_input(args: &Args) -> Result<Dataset> {
    match (&args.dataset, args.synthetic) {
        (Some(path), None) => load_dataset(path),
        (None, Some(n)) => Ok(synthetic_dataset(n, SYNTHETIC_SEED)),
        _ => bail!("exactly one of --dataset or --synthetic is required\n{USAGE}"),
    }
}

/// Window from the flags, or the block default when no flag is given.
fn resolve_window(
    args: &Args,
    engine: &PlanningEngine,
    store: &MemoryStore,
    block: &MarketBlock,
) -> Result<Option<ReportingWindow>> {
    let months = engine.params().default_window_months;
    let window = match (args.from, args.to) {
        (Some(from), Some(to)) => Some(ReportingWindow::new(from, to)?),
        (Some(from), None) => Some(ReportingWindow::starting_at(from, months)?),
        (None, Some(to)) => {
            let from = to.add_months(1 - i64::from(months.max(1)))?;
            Some(ReportingWindow::new(from, to)?)
        }
        (None, None) => engine.default_window(store, block)?,
    };
    Ok(window)
}

fn money(v: Decimal) -> Decimal {
    v.round_dp(2)
}

fn print_report(report: &BlockReport) {
    println!(
        "Block {} | window {}..{} | cities: {} | excluded: {}",
        report.block,
        report.window.start(),
        report.window.end(),
        report.cities.len(),
        report.excluded.len()
    );
    for c in &report.cities {
        let t = &c.totals;
        println!(
            "  {} {:<20} rides: {} | proj mkt: ${} | proj ops: ${} | real mkt: ${} | real ops: ${} | revenue: ${} | months actual/est: {}/{}",
            c.city_id,
            c.name,
            t.rides,
            money(t.projected_marketing),
            money(t.projected_operational),
            money(t.reconciled_marketing),
            money(t.reconciled_operational),
            money(t.revenue),
            t.actual_months,
            t.estimated_months
        );
    }
    for e in &report.excluded {
        match &e.reason {
            ExclusionReason::InactiveStatus { status } => println!("  {} excluded: status {}", e.city_id, status),
            ExclusionReason::InvalidData { message } => println!("  {} excluded: {}", e.city_id, message),
        }
    }
    let t = &report.totals;
    println!(
        "TOTAL | rides: {} | proj cost: ${} | real cost: ${} | revenue: ${}",
        t.rides,
        money(t.projected_cost().total()),
        money(t.reconciled_cost().total()),
        money(t.revenue)
    );
    println!(
        "KPI projected | cost/ride: ${} | margin: ${}",
        money(report.projected_kpis.cost_per_ride),
        money(report.projected_kpis.margin)
    );
    println!(
        "KPI reconciled | cost/ride: ${} | margin: ${} | estimated months: {} of {}",
        money(report.reconciled_kpis.cost_per_ride),
        money(report.reconciled_kpis.margin),
        t.estimated_months,
        t.actual_months + t.estimated_months
    );
}

/// One window per city: the span of every reported window the city appears in.
fn persist_windows(runs: &[(MarketBlock, ReportingWindow)]) -> Result<BTreeMap<CityId, ReportingWindow>> {
    let mut windows: BTreeMap<CityId, ReportingWindow> = BTreeMap::new();
    for (block, window) in runs {
        for &id in &block.city_ids {
            let merged = match windows.get(&id) {
                Some(w) => ReportingWindow::new(w.start().min(window.start()), w.end().max(window.end()))?,
                None => *window,
            };
            windows.insert(id, merged);
        }
    }
    Ok(windows)
}

fn persist(
    url: &str,
    engine: &PlanningEngine,
    store: &mut MemoryStore,
    runs: &[(MarketBlock, ReportingWindow)],
) -> Result<()> {
    let windows = persist_windows(runs)?;
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let pool = persistence::init_db(url).await?;
        let cities: Vec<_> = store.cities().cloned().collect();
        for city in &cities {
            persistence::upsert_city(&pool, city).await?;
        }
        let mut saved = 0usize;
        let mut failed = 0usize;
        for (&id, window) in &windows {
            match engine.recompute_city(store, id, window) {
                Ok(result) => {
                    persistence::save_planning_result(&pool, &result).await?;
                    saved += 1;
                }
                Err(e) => {
                    warn!(city = %id, error = %e, "planning result not persisted");
                    failed += 1;
                }
            }
        }
        info!(url, saved, failed, "persisted planning results");
        Ok::<_, anyhow::Error>(())
    })
}

fn main() -> Result<()> {
    // Logging setup; stdout is reserved for the report
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    if args.version {
        println!("plan-cli {} ({})", env!("GIT_SHA"), env!("BUILD_DATE"));
        return Ok(());
    }
    info!(?args, "starting CLI");

    let engine = PlanningEngine::new(load_params(&args)?)?;
    let dataset = load_input(&args)?;
    dataset.check_references()?;
    let mut store = MemoryStore::from_parts(dataset.cities, dataset.blocks, dataset.real_costs)?;

    let blocks: Vec<MarketBlock> = match &args.block {
        Some(name) => vec![store.block(name).with_context(|| format!("unknown market block {name:?}"))?],
        None => store.blocks().cloned().collect(),
    };
    let options = AggregateOptions {
        status: if args.all_statuses {
            StatusFilter::All
        } else {
            StatusFilter::ActiveOnly
        },
        on_invalid: if args.exclude_invalid {
            FailurePolicy::ExcludeAndReport
        } else {
            FailurePolicy::FailFast
        },
    };

    let mut reports = Vec::with_capacity(blocks.len());
    let mut runs = Vec::with_capacity(blocks.len());
    for block in blocks {
        let Some(window) = resolve_window(&args, &engine, &store, &block)? else {
            info!(block = %block.name, "no launched city in block; skipped");
            continue;
        };
        let report = engine
            .block_report(&store, &block, &window, options)
            .with_context(|| format!("aggregating block {:?}", block.name))?;
        reports.push(report);
        runs.push((block, window));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            print_report(r);
        }
    }

    if let Some(url) = &args.db {
        persist(url, &engine, &mut store, &runs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_core::{City, CityStatus};

    fn m(y: i32, mo: u32) -> MonthKey {
        MonthKey::new(y, mo).unwrap()
    }

    fn fixture() -> (PlanningEngine, MemoryStore, MarketBlock) {
        let mut store = MemoryStore::new();
        for (id, start) in [(1, Some(m(2024, 3))), (2, Some(m(2023, 11))), (3, None)] {
            store.insert_city(City {
                id: CityId(id),
                name: format!("c{id}"),
                population: 80_000,
                population_15_to_44: 30_000,
                implementation_start: start,
                status: CityStatus::Expansion,
            });
        }
        let block = MarketBlock {
            name: "b".into(),
            city_ids: vec![CityId(1), CityId(2), CityId(3)],
        };
        store.insert_block(block.clone());
        (PlanningEngine::reference(), store, block)
    }

    #[test]
    fn window_defaults_to_earliest_launch() {
        let (engine, store, block) = fixture();
        let w = resolve_window(&Args::default(), &engine, &store, &block).unwrap().unwrap();
        assert_eq!(w.start(), m(2023, 11));
        assert_eq!(w.end(), m(2024, 10));
    }

    #[test]
    fn window_flags_override_default() {
        let (engine, store, block) = fixture();
        let args = Args {
            to: Some(m(2025, 6)),
            ..Args::default()
        };
        let w = resolve_window(&args, &engine, &store, &block).unwrap().unwrap();
        assert_eq!((w.start(), w.end()), (m(2024, 7), m(2025, 6)));

        let args = Args {
            from: Some(m(2025, 6)),
            to: Some(m(2025, 1)),
            ..Args::default()
        };
        assert!(resolve_window(&args, &engine, &store, &block).is_err());
    }

    #[test]
    fn city_in_several_blocks_is_persisted_once_over_both_windows() {
        let (_, _, block) = fixture();
        let other = MarketBlock {
            name: "c".into(),
            city_ids: vec![CityId(2), CityId(2)],
        };
        let runs = vec![
            (block, ReportingWindow::new(m(2024, 1), m(2024, 6)).unwrap()),
            (other, ReportingWindow::new(m(2024, 4), m(2024, 12)).unwrap()),
        ];
        let windows = persist_windows(&runs).unwrap();
        assert_eq!(windows.len(), 3);
        let w = windows[&CityId(2)];
        assert_eq!((w.start(), w.end()), (m(2024, 1), m(2024, 12)));
        let w = windows[&CityId(1)];
        assert_eq!((w.start(), w.end()), (m(2024, 1), m(2024, 6)));
    }

    #[test]
    fn negative_recorded_cost_stops_the_run() {
        let text = r#"{
            "cities": [{"id": 1, "population": 60000, "population_15_to_44": 10000,
                        "implementation_start": "2024-01", "status": "EXPANSION"}],
            "real_costs": [{"city_id": 1, "month": "2024-01",
                            "marketing_cost": "-1000000", "operational_cost": "0"}]
        }"#;
        let ds = Dataset::from_json_str(text).unwrap();
        ds.check_references().unwrap();
        assert!(MemoryStore::from_parts(ds.cities, ds.blocks, ds.real_costs).is_err());
    }
}
