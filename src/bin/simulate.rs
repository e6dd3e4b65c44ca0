//! Simulate a single loadout and print its turn statistics.
//!
//! Usage:
//!   simulate --counts 2,0,4 [--catalog FILE] [--turns N] [--target N]
//!            [--profile NAME] [--seed N]
//!
//! `--counts` is the per-die-type count vector in catalog order (sorted by
//! name) and must sum to 6.

use farkle::ranking::GroupedHandPercentages;
use farkle::scoring::ScoreTable;
use farkle::simulation::run_campaign;
use farkle::{Catalog, OptimizationSettings, RiskProfile};

struct Args {
    catalog: String,
    counts: Vec<u32>,
    turns: u32,
    target: u32,
    profile: RiskProfile,
    seed: Option<u64>,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        catalog: std::env::var("FARKLE_CATALOG").unwrap_or_else(|_| "dice.json".to_string()),
        counts: Vec::new(),
        turns: 10_000,
        target: 2_000,
        profile: RiskProfile::Balanced,
        seed: Some(42),
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
            "--counts" => {
                args.counts = value(&mut i)
                    .split(',')
                    .map(|part| {
                        part.trim().parse().unwrap_or_else(|_| {
                            eprintln!("Invalid count: {part}");
                            std::process::exit(1);
                        })
                    })
                    .collect();
            }
            "--turns" => args.turns = parse_or_exit(&value(&mut i), "--turns"),
            "--target" => args.target = parse_or_exit(&value(&mut i), "--target"),
            "--profile" => {
                args.profile = RiskProfile::parse(&value(&mut i)).unwrap_or_else(|e| {
                    eprintln!("{e}");
                    std::process::exit(1);
                })
            }
            "--seed" => args.seed = Some(parse_or_exit(&value(&mut i), "--seed")),
            "--no-seed" => args.seed = None,
            other => {
                eprintln!("Unknown option: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    if args.counts.is_empty() {
        eprintln!("--counts is required (e.g. --counts 2,0,4)");
        std::process::exit(1);
    }
    args
}

fn parse_or_exit<T: std::str::FromStr>(text: &str, flag: &str) -> T {
    text.parse().unwrap_or_else(|_| {
        eprintln!("Invalid {flag} value: {text}");
        std::process::exit(1);
    })
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

    let settings = OptimizationSettings {
        target: args.target,
        num_turns: args.turns,
        risk_profile: args.profile,
        ..OptimizationSettings::default()
    };

    let table = ScoreTable::build();
    let result = match run_campaign(&catalog, &table, &args.counts, &settings, args.seed) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Simulation failed: {e}");
            std::process::exit(1);
        }
    };

    println!("Loadout:");
    for (die, &count) in result.counts.iter().enumerate() {
        if count > 0 {
            println!("  {}x {}", count, catalog.get(die).name());
        }
    }
    println!(
        "\n{} turns, target {} ({} profile)",
        args.turns,
        args.target,
        args.profile.as_str()
    );
    println!(
        "  mean points/turn: {:.1} +/- {:.1} (se {:.2})",
        result.mean_points, result.std_dev, result.metrics.ev_points_se
    );
    println!("  scoring turns:    {}", result.scoring_turns);
    println!("  ev turns:         {:.2}", result.metrics.ev_turns);
    println!(
        "  p50 / p90 turns:  {:.0} / {:.0}",
        result.metrics.p50_turns, result.metrics.p90_turns
    );
    for (&turn, &prob) in &result.metrics.p_within {
        println!("  P(reach by {turn:>3}):  {:.3}", prob);
    }

    let grouped = GroupedHandPercentages::from_result(&result);
    println!("\nGroup mix ({} groups):", result.total_groups);
    println!("  singles: {}%", grouped.single_ok);
    println!(
        "  kinds:   3x {}%, 4x {}%, 5x {}%, 6x {}%",
        grouped.triple_ok, grouped.quad_ok, grouped.quint_ok, grouped.sext_ok
    );
    println!(
        "  straights: five-long {}%, full {}%",
        grouped.straight5, grouped.straight6
    );
}
