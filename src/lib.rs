//! # Farkle — Weighted-Dice Loadout Optimizer
//!
//! Given an inventory of weighted six-sided dice and a scoring objective,
//! find the 6-die loadout that maximizes the objective. The engine:
//!
//! 1. enumerates every feasible 6-die multiset from the inventory
//!    ([`search`]),
//! 2. evaluates each by seeded Monte Carlo turn simulation under a
//!    risk-aware policy ([`simulation`], [`policy`], [`scoring`]),
//! 3. folds the per-turn score distribution into reach metrics
//!    ([`metrics`]),
//! 4. prunes in stages and ranks the survivors ([`workflow`], [`ranking`]),
//! 5. caches every evaluation by content-addressed key so identical re-runs
//!    are nearly free ([`cache`]).
//!
//! ## Determinism
//!
//! Pilot stages derive per-loadout seeds from `efficiency_seed + stage`
//! through [`seed::seed_for`], so pruning decisions replay exactly.
//! Reproducibility of full runs is provided by cache identity: the key
//! ([`cache::key`]) is a SHA-256 over canonical JSON of the catalog
//! signature, the effective settings, and the count vector.
//!
//! ## Scoring rules
//!
//! Singles: each 1 scores 100, each 5 scores 50. Three or more of a kind
//! (n >= 3): base x (n - 2), base 1000 for ones else 100 x face. Straights:
//! 1-5 scores 500, 2-6 scores 750, 1-6 scores 1500. A roll with no scoring
//! selection is a bust.

pub mod cache;
pub mod cancel;
pub mod constants;
pub mod dice;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod perf;
pub mod policy;
pub mod ranking;
pub mod scoring;
pub mod search;
pub mod seed;
pub mod settings;
pub mod simulation;
pub mod workflow;

pub use cancel::CancellationToken;
pub use dice::{Catalog, DieType};
pub use error::SolverError;
pub use ranking::Objective;
pub use settings::{EfficiencyStage, OptimizationSettings, RiskProfile};
pub use simulation::SimulationResult;
pub use workflow::{Workflow, WorkflowOptions, WorkflowOutcome};
