//! Exact continuation policy: bust probability and expected single-decision
//! points for k remaining dice.
//!
//! The estimate treats the loadout's remaining dice as i.i.d. draws from the
//! loadout's arithmetic-mean face distribution and sums over all multinomial
//! face patterns of size k, scoring each pattern through the precomputed
//! table. The resulting `(bust_k, ev_k)` pairs feed the simulator's
//! risk-aware selection value and its bank/keep-rolling decision.

use crate::constants::{LOADOUT_SIZE, NUM_FACES};
use crate::dice::Catalog;
use crate::error::SolverError;
use crate::scoring::{pack_face_counts, FaceCounts, ScoreTable};

/// n! for n in 0..=6.
const FACTORIAL: [f64; 7] = [1.0, 1.0, 2.0, 6.0, 24.0, 120.0, 720.0];

/// Memoized `(bust_k, ev_k)` for one loadout setup, k in 1..=6.
#[derive(Clone, Debug)]
pub struct PolicyEstimator {
    bust: [f64; LOADOUT_SIZE + 1],
    ev: [f64; LOADOUT_SIZE + 1],
}

impl PolicyEstimator {
    /// Compute the exact pair for every k by multinomial enumeration.
    ///
    /// Fails with `InvalidLoadout` when the face distribution carries no
    /// probability mass.
    pub fn new(table: &ScoreTable, face_dist: &[f64; NUM_FACES]) -> Result<Self, SolverError> {
        let sum: f64 = face_dist.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(SolverError::InvalidLoadout(format!(
                "face distribution sums to {sum}"
            )));
        }
        let mut dist = [0.0f64; NUM_FACES];
        for (d, &p) in dist.iter_mut().zip(face_dist.iter()) {
            *d = p / sum;
        }

        let mut bust = [0.0f64; LOADOUT_SIZE + 1];
        let mut ev = [0.0f64; LOADOUT_SIZE + 1];
        let mut pattern = [0u8; NUM_FACES];
        for k in 1..=LOADOUT_SIZE {
            let (b, e) = accumulate_patterns(table, &dist, &mut pattern, 0, k as u8, k);
            bust[k] = b;
            ev[k] = e;
        }

        Ok(Self { bust, ev })
    }

    /// Probability that a roll of k dice scores nothing.
    #[inline(always)]
    pub fn bust_probability(&self, k: usize) -> f64 {
        debug_assert!((1..=LOADOUT_SIZE).contains(&k), "k {k} out of range");
        self.bust[k]
    }

    /// Expected best-selection points of a roll of k dice.
    #[inline(always)]
    pub fn expected_points(&self, k: usize) -> f64 {
        debug_assert!((1..=LOADOUT_SIZE).contains(&k), "k {k} out of range");
        self.ev[k]
    }
}

/// Arithmetic-mean face distribution of a loadout (indices into the catalog).
pub fn mean_face_distribution(catalog: &Catalog, loadout: &[usize]) -> [f64; NUM_FACES] {
    let mut dist = [0.0f64; NUM_FACES];
    if loadout.is_empty() {
        return dist;
    }
    for &die in loadout {
        let probs = catalog.get(die).probabilities();
        for face in 0..NUM_FACES {
            dist[face] += probs[face + 1];
        }
    }
    for d in &mut dist {
        *d /= loadout.len() as f64;
    }
    dist
}

/// Walk all face patterns of exactly k dice, accumulating (bust, ev).
fn accumulate_patterns(
    table: &ScoreTable,
    dist: &[f64; NUM_FACES],
    pattern: &mut FaceCounts,
    face: usize,
    budget: u8,
    k: usize,
) -> (f64, f64) {
    if face == NUM_FACES - 1 {
        pattern[face] = budget;
        let result = score_pattern(table, dist, pattern, k);
        pattern[face] = 0;
        return result;
    }
    let mut bust = 0.0;
    let mut ev = 0.0;
    for c in 0..=budget {
        pattern[face] = c;
        let (b, e) = accumulate_patterns(table, dist, pattern, face + 1, budget - c, k);
        bust += b;
        ev += e;
    }
    pattern[face] = 0;
    (bust, ev)
}

/// Probability-weighted contribution of one pattern.
fn score_pattern(
    table: &ScoreTable,
    dist: &[f64; NUM_FACES],
    pattern: &FaceCounts,
    k: usize,
) -> (f64, f64) {
    let mut prob = FACTORIAL[k];
    for (face, &c) in pattern.iter().enumerate() {
        if c > 0 {
            prob *= dist[face].powi(i32::from(c)) / FACTORIAL[c as usize];
        }
    }
    if prob == 0.0 {
        return (0.0, 0.0);
    }

    let selections = table.selections_packed(pack_face_counts(pattern));
    if selections.is_empty() {
        (prob, 0.0)
    } else {
        let best = selections.iter().map(|s| s.points).max().unwrap_or(0);
        (0.0, prob * f64::from(best))
    }
}
