//! Optimize loadouts from a dice catalog and print the ranked survivors.
//!
//! Usage:
//!   optimize [--catalog FILE] [--per-die N] [--turns N] [--target N]
//!            [--profile NAME] [--objective NAME] [--workers N] [--top N]
//!            [--no-efficiency] [--clear-cache]
//!
//! The catalog path defaults to `FARKLE_CATALOG` (then `dice.json`); the
//! cache directory comes from `FARKLE_CACHE_DIR` (default `cache/`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use farkle::cache::CacheStore;
use farkle::ranking::{rank_results, GroupedHandPercentages};
use farkle::search::{count_combinations, enumerate_loadouts};
use farkle::workflow::{ProgressEvent, ProgressSink};
use farkle::{
    Catalog, Objective, OptimizationSettings, RiskProfile, Workflow, WorkflowOptions,
};

struct Args {
    catalog: String,
    per_die: u32,
    turns: u32,
    target: u32,
    profile: RiskProfile,
    objective: Objective,
    workers: usize,
    top: usize,
    efficiency: bool,
    clear_cache: bool,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        catalog: std::env::var("FARKLE_CATALOG").unwrap_or_else(|_| "dice.json".to_string()),
        per_die: 6,
        turns: 10_000,
        target: 2_000,
        profile: RiskProfile::Balanced,
        objective: Objective::MaxScore,
        workers: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        top: 20,
        efficiency: true,
        clear_cache: false,
    };

    let mut i = 1;
    while i < argv.len() {
        let value = |i: &mut usize| -> String {
            *i += 1;
            argv.get(*i).cloned().unwrap_or_else(|| {
                eprintln!("Missing value for {}", argv[*i - 1]);
                std::process::exit(1);
            })
        };
        match argv[i].as_str() {
            "--catalog" => args.catalog = value(&mut i),
            "--per-die" => args.per_die = parse_or_exit(&value(&mut i), "--per-die"),
            "--turns" => args.turns = parse_or_exit(&value(&mut i), "--turns"),
            "--target" => args.target = parse_or_exit(&value(&mut i), "--target"),
            "--profile" => {
                args.profile = RiskProfile::parse(&value(&mut i)).unwrap_or_else(|e| {
                    eprintln!("{e}");
                    std::process::exit(1);
                })
            }
            "--objective" => {
                args.objective = Objective::parse(&value(&mut i)).unwrap_or_else(|e| {
                    eprintln!("{e}");
                    std::process::exit(1);
                })
            }
            "--workers" => args.workers = parse_or_exit(&value(&mut i), "--workers"),
            "--top" => args.top = parse_or_exit(&value(&mut i), "--top"),
            "--no-efficiency" => args.efficiency = false,
            "--clear-cache" => args.clear_cache = true,
            other => {
                eprintln!("Unknown option: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    args
}

fn parse_or_exit<T: std::str::FromStr>(text: &str, flag: &str) -> T {
    text.parse().unwrap_or_else(|_| {
        eprintln!("Invalid {flag} value: {text}");
        std::process::exit(1);
    })
}

/// Prints one status line per event.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        println!(
            "  stage {}/{} [{}]: {}/{} done ({} hits, {} misses, {:.1}s)",
            event.stage_index + 1,
            event.stage_count,
            event.stage_kind.as_str(),
            event.processed,
            event.total,
            event.cache_hits,
            event.cache_misses,
            event.elapsed_ms as f64 / 1000.0,
        );
    }
}

fn main() {
    env_logger::init();
    let args = parse_args();

    let catalog = match Catalog::load(&args.catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load catalog {}: {e}", args.catalog);
            std::process::exit(1);
        }
    };
    println!("Catalog: {} die types from {}", catalog.len(), args.catalog);

    let inventory = catalog.default_inventory(args.per_die);
    let total = count_combinations(&inventory, 6);
    println!("Feasible loadouts: {total}");
    if total == 0 {
        eprintln!("Inventory cannot fill a 6-die loadout");
        std::process::exit(1);
    }
    let loadouts = enumerate_loadouts(&inventory, 6, None);

    let cache_dir =
        std::env::var("FARKLE_CACHE_DIR").unwrap_or_else(|_| "cache".to_string());
    let cache = match CacheStore::open_default(&cache_dir) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to open cache at {cache_dir}: {e}");
            std::process::exit(1);
        }
    };
    if args.clear_cache {
        match cache.clear_all() {
            Ok(n) => println!("Cleared {n} cached entries"),
            Err(e) => eprintln!("Cache clear failed: {e}"),
        }
    }

    let settings = OptimizationSettings {
        target: args.target,
        num_turns: args.turns,
        risk_profile: args.profile,
        objective: args.objective,
        efficiency_enabled: args.efficiency,
        ..OptimizationSettings::default()
    };
    let options = WorkflowOptions {
        worker_count: args.workers,
        progress: Some(Arc::new(ConsoleProgress)),
        progress_interval: Duration::from_millis(1_000),
        ..WorkflowOptions::default()
    };

    let workflow = Workflow::new(Arc::new(catalog.clone()), Arc::clone(&cache));
    let start = Instant::now();
    let outcome = match workflow.run(&loadouts, &settings, &options) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Optimization failed: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "Evaluated {} loadouts in {:.1}s ({} cache hits, {} misses)",
        loadouts.len(),
        start.elapsed().as_secs_f64(),
        outcome.telemetry.total_cache_hits,
        outcome.telemetry.total_cache_misses,
    );

    let order = rank_results(&outcome.results, settings.objective);
    println!(
        "\n{:<4} {:<40} {:>9} {:>9} {:>8}  groups",
        "#", "loadout", "ev_turns", "ev_pts", "p50"
    );
    for (rank, &i) in order.iter().take(args.top).enumerate() {
        let result = &outcome.results[i];
        let name = result
            .counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(die, &c)| format!("{}x {}", c, catalog.get(die).name()))
            .collect::<Vec<_>>()
            .join(", ");
        let grouped = GroupedHandPercentages::from_result(result);
        println!(
            "{:<4} {:<40} {:>9.2} {:>9.1} {:>8.0}  1s:{}% 3k:{}% 5s:{}%",
            rank + 1,
            name,
            result.metrics.ev_turns,
            result.metrics.ev_points,
            result.metrics.p50_turns,
            grouped.single_ok,
            grouped.triple_ok,
            grouped.straight5,
        );
    }
}
