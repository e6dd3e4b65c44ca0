//! Turn-distribution metrics via forward dynamic programming.
//!
//! Treats consecutive turns as independent draws from the simulated per-turn
//! score distribution and folds the below-target state forward until the
//! target is reached with probability [`REACH_EARLY_STOP`] or the horizon
//! runs out. `ev_turns` uses the survival-sum identity: the below-target mass
//! is accumulated before each fold, so the truncated sum equals
//! sum over t of P(target not reached after t turns).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::REACH_EARLY_STOP;

/// Serialize non-finite floats as JSON null and read null back as infinity.
mod nullable_float {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Folded metrics over the per-turn score distribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Expected number of turns to reach the target (may be infinite).
    #[serde(with = "nullable_float")]
    pub ev_turns: f64,
    /// P(target reached within t turns) for each requested checkpoint.
    pub p_within: BTreeMap<u32, f64>,
    /// Unconditional expected points per turn.
    pub ev_points: f64,
    /// Smallest t with reach probability >= 0.5 (infinite if never).
    #[serde(with = "nullable_float")]
    pub p50_turns: f64,
    /// Smallest t with reach probability >= 0.9 (infinite if never).
    #[serde(with = "nullable_float")]
    pub p90_turns: f64,
    /// Standard error of the per-turn mean from the simulation.
    pub ev_points_se: f64,
}

impl TurnMetrics {
    /// All-infinite metrics for degenerate distributions.
    fn degenerate(ev_points: f64, prob_turns: &[u32], ev_points_se: f64) -> Self {
        Self {
            ev_turns: f64::INFINITY,
            p_within: prob_turns.iter().map(|&t| (t, 0.0)).collect(),
            ev_points,
            p50_turns: f64::INFINITY,
            p90_turns: f64::INFINITY,
            ev_points_se,
        }
    }
}

/// Fold `turn_distribution` (index = per-turn score, values summing to ~1)
/// into reach metrics for `target`.
///
/// A distribution whose support has at most one point never yields usable
/// reach estimates and returns infinite metrics.
pub fn compute_turn_metrics(
    turn_distribution: &[f64],
    target: u32,
    max_turns: u32,
    prob_turns: &[u32],
    ev_points_se: f64,
) -> TurnMetrics {
    let ev_points: f64 = turn_distribution
        .iter()
        .enumerate()
        .map(|(score, &p)| score as f64 * p)
        .sum();

    if target == 0 {
        return TurnMetrics {
            ev_turns: 0.0,
            p_within: prob_turns.iter().map(|&t| (t, 1.0)).collect(),
            ev_points,
            p50_turns: 1.0,
            p90_turns: 1.0,
            ev_points_se,
        };
    }

    let support: Vec<(usize, f64)> = turn_distribution
        .iter()
        .enumerate()
        .filter(|(_, &p)| p > 0.0)
        .map(|(score, &p)| (score, p))
        .collect();
    if support.len() <= 1 {
        return TurnMetrics::degenerate(ev_points, prob_turns, ev_points_se);
    }

    let target_idx = target as usize;
    // Below-target mass by accumulated score; transitions landing at or past
    // the target leave this vector.
    let mut below = vec![0.0f64; target_idx];
    below[0] = 1.0;
    let below_support: Vec<(usize, f64)> = support
        .iter()
        .copied()
        .filter(|&(score, _)| score < target_idx)
        .collect();

    let max_turns = max_turns.max(1);
    let mut reached_by: Vec<f64> = Vec::with_capacity(max_turns as usize);
    let mut ev_turns = 0.0f64;
    let mut next = vec![0.0f64; target_idx];

    for _ in 1..=max_turns {
        let alive: f64 = below.iter().sum();
        ev_turns += alive;

        for slot in next.iter_mut() {
            *slot = 0.0;
        }
        for (x, &mass) in below.iter().enumerate() {
            if mass > 0.0 {
                for &(score, p) in &below_support {
                    if x + score < target_idx {
                        next[x + score] += mass * p;
                    }
                }
            }
        }
        std::mem::swap(&mut below, &mut next);

        let remaining: f64 = below.iter().sum();
        let reached = (1.0 - remaining).clamp(0.0, 1.0);
        reached_by.push(reached);
        if reached >= REACH_EARLY_STOP {
            break;
        }
    }

    let last = *reached_by.last().expect("at least one iteration");
    let reach_at = |t: u32| -> f64 {
        if t == 0 {
            0.0
        } else {
            reached_by
                .get(t as usize - 1)
                .copied()
                .unwrap_or(last)
        }
    };
    let first_reaching = |threshold: f64| -> f64 {
        reached_by
            .iter()
            .position(|&r| r >= threshold)
            .map_or(f64::INFINITY, |i| (i + 1) as f64)
    };

    TurnMetrics {
        ev_turns,
        p_within: prob_turns.iter().map(|&t| (t, reach_at(t))).collect(),
        ev_points,
        p50_turns: first_reaching(0.5),
        p90_turns: first_reaching(0.9),
        ev_points_se,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_flip_distribution() {
        // S2: P(0) = P(200) = 0.5, target 200 => p_within[1] = 0.5,
        // p_within[2] = 0.75.
        let mut dist = vec![0.0; 201];
        dist[0] = 0.5;
        dist[200] = 0.5;
        let m = compute_turn_metrics(&dist, 200, 5, &[1, 2], 0.0);
        assert!((m.p_within[&1] - 0.5).abs() < 1e-12);
        assert!((m.p_within[&2] - 0.75).abs() < 1e-12);
        assert!((m.ev_points - 100.0).abs() < 1e-12);
        assert_eq!(m.p50_turns, 1.0);
    }

    #[test]
    fn test_geometric_ev_turns() {
        // Reaching on each turn with probability p = 0.5 gives E[T] = 2,
        // truncated only by the 0.995 early stop.
        let mut dist = vec![0.0; 201];
        dist[0] = 0.5;
        dist[200] = 0.5;
        let m = compute_turn_metrics(&dist, 200, 60, &[], 0.0);
        let exact: f64 = 2.0;
        assert!(
            (m.ev_turns - exact).abs() < 0.05,
            "ev_turns {} vs {}",
            m.ev_turns,
            exact
        );
    }

    #[test]
    fn test_target_zero() {
        let dist = vec![0.25, 0.5, 0.25];
        let m = compute_turn_metrics(&dist, 0, 60, &[10, 15], 0.0);
        assert_eq!(m.ev_turns, 0.0);
        assert_eq!(m.p_within[&10], 1.0);
        assert_eq!(m.p_within[&15], 1.0);
        assert_eq!(m.p50_turns, 1.0);
        assert_eq!(m.p90_turns, 1.0);
    }

    #[test]
    fn test_degenerate_support_is_infinite() {
        // P5: support <= 1 means infinite metrics.
        let mut dist = vec![0.0; 100];
        dist[0] = 1.0;
        let m = compute_turn_metrics(&dist, 100, 60, &[10], 0.0);
        assert!(m.ev_turns.is_infinite());
        assert!(m.p50_turns.is_infinite());
        assert!(m.p90_turns.is_infinite());
        assert_eq!(m.p_within[&10], 0.0);
    }

    #[test]
    fn test_monotone_reach() {
        // P5: p_within is non-decreasing; p50 <= p90.
        let mut dist = vec![0.0; 301];
        dist[0] = 0.3;
        dist[100] = 0.4;
        dist[300] = 0.3;
        let m = compute_turn_metrics(&dist, 500, 60, &[1, 2, 5, 10, 20], 0.0);
        let values: Vec<f64> = m.p_within.values().copied().collect();
        for pair in values.windows(2) {
            assert!(pair[0] <= pair[1] + 1e-12);
        }
        assert!(m.p50_turns <= m.p90_turns);
    }

    #[test]
    fn test_infinity_json_roundtrip() {
        let m = TurnMetrics::degenerate(12.0, &[10], 0.5);
        let bytes = serde_json::to_vec(&m).unwrap();
        let back: TurnMetrics = serde_json::from_slice(&bytes).unwrap();
        assert!(back.ev_turns.is_infinite());
        assert_eq!(back.ev_points, 12.0);
    }
}
