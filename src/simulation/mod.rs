//! Stochastic turn simulation.
//!
//! - [`engine`]: per-turn state machine and the seeded N-turn campaign runner

pub mod engine;

pub use engine::{run_campaign, SimulationResult};
