//! Turn simulation engine: play N turns of a loadout under a risk policy.
//!
//! Each turn walks the state machine start -> rolling -> choose -> spend ->
//! (banked | busted), with the hot-dice refill when every die has been spent.
//! Selection choice is risk-aware (`points + alpha * ev - beta * bust * 500`)
//! and memoized by packed roll key, valid because the packed key fixes the
//! number of dice rolled. Dice are spent lowest-quality first, stable on
//! insertion order, so tag distributions are reproducible.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::{
    BUST_PENALTY_POINTS, DEFAULT_MAX_TURNS, LOADOUT_SIZE, NUM_FACES, RiskPolicy,
};
use crate::dice::{expand_loadout, Catalog};
use crate::error::SolverError;
use crate::metrics::{compute_turn_metrics, TurnMetrics};
use crate::policy::{mean_face_distribution, PolicyEstimator};
use crate::scoring::{pack_face_counts, ScoreSelection, ScoreTable, Tag};
use crate::seed::seed_for;
use crate::settings::OptimizationSettings;

/// Aggregate outcome of one seeded campaign for one loadout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationResult {
    /// The loadout's count vector over the catalog.
    pub counts: Vec<u32>,
    pub metrics: TurnMetrics,
    /// Mean banked points per turn (busts count as 0).
    pub mean_points: f64,
    /// Population standard deviation of per-turn points.
    pub std_dev: f64,
    /// Scoring-group tag counters over all banked turns.
    pub tag_counts: BTreeMap<String, u64>,
    /// Total scoring groups across all banked turns.
    pub total_groups: u64,
    /// Turns that banked a positive score.
    pub scoring_turns: u64,
}

/// Per-loadout immutable dice data, ordered for spending.
struct LoadoutDice {
    /// Cumulative face distribution per loadout slot.
    cdf: [[f64; NUM_FACES]; LOADOUT_SIZE],
    /// Slot ids sorted by (quality, insertion order): the spend order.
    order: [u8; LOADOUT_SIZE],
}

impl LoadoutDice {
    fn new(catalog: &Catalog, die_indices: &[usize]) -> Self {
        debug_assert_eq!(die_indices.len(), LOADOUT_SIZE);
        let mut cdf = [[0.0; NUM_FACES]; LOADOUT_SIZE];
        for (slot, &die) in die_indices.iter().enumerate() {
            cdf[slot] = *catalog.get(die).cdf();
        }
        let mut order: [u8; LOADOUT_SIZE] = [0, 1, 2, 3, 4, 5];
        order.sort_by(|&a, &b| {
            let qa = catalog.get(die_indices[a as usize]).quality();
            let qb = catalog.get(die_indices[b as usize]).quality();
            qa.partial_cmp(&qb).unwrap().then(a.cmp(&b))
        });
        Self { cdf, order }
    }

    #[inline(always)]
    fn sample_face(&self, slot: u8, u: f64) -> usize {
        let cdf = &self.cdf[slot as usize];
        for (face, &bound) in cdf.iter().enumerate() {
            if u < bound {
                return face;
            }
        }
        NUM_FACES - 1
    }
}

/// Pick the best selection for a roll by risk-adjusted value. When a
/// selection spends every remaining die the continuation is a full hot-dice
/// reroll, so the lookahead uses the full loadout size.
fn best_selection(
    selections: &[ScoreSelection],
    remaining: usize,
    policy: &PolicyEstimator,
    risk: &RiskPolicy,
) -> u16 {
    let mut best_idx = 0u16;
    let mut best_value = f64::NEG_INFINITY;
    for (i, sel) in selections.iter().enumerate() {
        let after = remaining - sel.used_dice as usize;
        let k = if after == 0 { LOADOUT_SIZE } else { after };
        let value = f64::from(sel.points) + risk.alpha * policy.expected_points(k)
            - risk.beta * policy.bust_probability(k) * BUST_PENALTY_POINTS;
        if value > best_value {
            best_value = value;
            best_idx = i as u16;
        }
    }
    best_idx
}

/// Play a single turn. Returns the banked points (0 on bust) and, for banked
/// turns only, merges the turn's tag groups into the campaign accumulators.
fn play_turn(
    rng: &mut SmallRng,
    dice: &LoadoutDice,
    table: &ScoreTable,
    policy: &PolicyEstimator,
    risk: &RiskPolicy,
    target: u32,
    choice_memo: &mut HashMap<u32, u16>,
    tag_counts: &mut BTreeMap<Tag, u64>,
    total_groups: &mut u64,
) -> u32 {
    let mut remaining = dice.order;
    let mut len = LOADOUT_SIZE;
    let mut accumulated = 0u32;
    let mut turn_tags: BTreeMap<Tag, u64> = BTreeMap::new();
    let mut turn_groups = 0u64;

    let banked = loop {
        // Roll every remaining die; record counts and, per face, which
        // positions produced it (positions are already in spend order).
        let mut counts = [0u8; NUM_FACES];
        let mut face_pos = [[0u8; LOADOUT_SIZE]; NUM_FACES];
        let mut face_len = [0usize; NUM_FACES];
        for (i, &slot) in remaining[..len].iter().enumerate() {
            let face = dice.sample_face(slot, rng.random::<f64>());
            counts[face] += 1;
            face_pos[face][face_len[face]] = i as u8;
            face_len[face] += 1;
        }

        let key = pack_face_counts(&counts);
        let selections = table.selections_packed(key);
        if selections.is_empty() {
            // Busted: the whole turn yields nothing, tags included.
            return 0;
        }

        let choice = *choice_memo
            .entry(key)
            .or_insert_with(|| best_selection(selections, len, policy, risk));
        let sel = &selections[choice as usize];

        // Spend: consume the first (lowest-quality) positions of each face.
        let mut used_mark = [false; LOADOUT_SIZE];
        for face in 0..NUM_FACES {
            for j in 0..sel.used_counts[face] as usize {
                used_mark[face_pos[face][j] as usize] = true;
            }
        }
        let mut write = 0usize;
        for read in 0..len {
            if !used_mark[read] {
                remaining[write] = remaining[read];
                write += 1;
            }
        }
        len = write;

        accumulated += sel.points;
        for &(tag, mult) in &sel.tags {
            *turn_tags.entry(tag).or_insert(0) += u64::from(mult);
            turn_groups += u64::from(mult);
        }

        if accumulated >= target {
            break accumulated;
        }
        if len == 0 {
            // Hot dice: refill and keep rolling.
            remaining = dice.order;
            len = LOADOUT_SIZE;
            continue;
        }
        if accumulated >= risk.bank_threshold {
            break accumulated;
        }
        if policy.bust_probability(len) <= risk.bust_limit {
            continue;
        }
        break accumulated;
    };

    for (tag, n) in turn_tags {
        *tag_counts.entry(tag).or_insert(0) += n;
    }
    *total_groups += turn_groups;
    banked
}

/// Run one seeded campaign of `settings.num_turns` turns for a loadout.
///
/// With a `seed_base` the RNG seed is derived from the base and the count
/// vector, so equal inputs replay the same campaign. Without one the seed
/// comes from the process clock.
pub fn run_campaign(
    catalog: &Catalog,
    table: &ScoreTable,
    counts: &[u32],
    settings: &OptimizationSettings,
    seed_base: Option<u64>,
) -> Result<SimulationResult, SolverError> {
    if counts.len() != catalog.len() {
        return Err(SolverError::InvalidInput(format!(
            "counts length {} does not match catalog size {}",
            counts.len(),
            catalog.len()
        )));
    }
    if settings.num_turns == 0 {
        return Err(SolverError::InvalidInput(
            "num_turns must be at least 1".to_string(),
        ));
    }
    let die_indices = expand_loadout(counts)?;
    let dist = mean_face_distribution(catalog, &die_indices);
    let policy = PolicyEstimator::new(table, &dist)?;
    let dice = LoadoutDice::new(catalog, &die_indices);
    let risk = settings.risk_profile.policy();

    let seed = match seed_base {
        Some(base) => seed_for(base, counts),
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    };
    let mut rng = SmallRng::seed_from_u64(seed);

    let cap = settings.score_cap as usize;
    let mut histogram = vec![0u64; cap + 1];
    let mut tag_counts: BTreeMap<Tag, u64> = BTreeMap::new();
    let mut total_groups = 0u64;
    let mut scoring_turns = 0u64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut choice_memo: HashMap<u32, u16> = HashMap::new();

    let n = settings.num_turns as u64;
    for _ in 0..n {
        let points = play_turn(
            &mut rng,
            &dice,
            table,
            &policy,
            &risk,
            settings.target,
            &mut choice_memo,
            &mut tag_counts,
            &mut total_groups,
        );
        histogram[(points as usize).min(cap)] += 1;
        let p = f64::from(points);
        sum += p;
        sum_sq += p * p;
        if points > 0 {
            scoring_turns += 1;
        }
    }

    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    let std_dev = variance.sqrt();

    let turn_distribution: Vec<f64> = histogram.iter().map(|&c| c as f64 / n as f64).collect();
    let metrics = compute_turn_metrics(
        &turn_distribution,
        settings.target,
        DEFAULT_MAX_TURNS,
        &settings.prob_turns,
        std_dev / (n as f64).sqrt(),
    );

    Ok(SimulationResult {
        counts: counts.to_vec(),
        metrics,
        mean_points: mean,
        std_dev,
        tag_counts: tag_counts
            .into_iter()
            .map(|(tag, n)| (tag.label(), n))
            .collect(),
        total_groups,
        scoring_turns,
    })
}
