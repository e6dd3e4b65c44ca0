//! Loadout search: bounded multisets of dice summing to the loadout size.
//!
//! A loadout is a count vector over the catalog, bounded per component by the
//! inventory. Counting uses a one-dimensional stars-and-bars DP; enumeration
//! is a depth-first recursion in lexicographic order.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use std::collections::HashSet;

/// Number of bounded count vectors summing to exactly `total`.
pub fn count_combinations(inventory: &[u32], total: u32) -> u64 {
    let total = total as usize;
    let mut ways = vec![0u64; total + 1];
    ways[0] = 1;
    for &bound in inventory {
        let mut next = vec![0u64; total + 1];
        for (sum, &w) in ways.iter().enumerate() {
            if w == 0 {
                continue;
            }
            for take in 0..=(bound as usize).min(total - sum) {
                next[sum + take] += w;
            }
        }
        ways = next;
    }
    ways[total]
}

/// All bounded count vectors summing to `total`, in lexicographic order.
/// `limit` stops enumeration early once that many vectors were produced.
pub fn enumerate_loadouts(
    inventory: &[u32],
    total: u32,
    limit: Option<usize>,
) -> Vec<Vec<u32>> {
    let mut out = Vec::new();
    if inventory.is_empty() {
        return out;
    }
    let mut current = vec![0u32; inventory.len()];
    enumerate_rec(inventory, total, 0, &mut current, limit, &mut out);
    out
}

fn enumerate_rec(
    inventory: &[u32],
    remaining: u32,
    position: usize,
    current: &mut Vec<u32>,
    limit: Option<usize>,
    out: &mut Vec<Vec<u32>>,
) {
    if let Some(limit) = limit {
        if out.len() >= limit {
            return;
        }
    }
    if position == inventory.len() - 1 {
        if remaining <= inventory[position] {
            current[position] = remaining;
            out.push(current.clone());
            current[position] = 0;
        }
        return;
    }
    for take in 0..=inventory[position].min(remaining) {
        current[position] = take;
        enumerate_rec(inventory, remaining - take, position + 1, current, limit, out);
        if let Some(limit) = limit {
            if out.len() >= limit {
                break;
            }
        }
    }
    current[position] = 0;
}

/// Sample up to `limit` distinct bounded count vectors, weighting each draw
/// by remaining inventory times die quality. Uniqueness is enforced by a
/// count-vector fingerprint; sampling gives up after `max(limit * 50, 1)`
/// attempts.
pub fn random_loadouts(
    inventory: &[u32],
    qualities: &[f64],
    total: u32,
    limit: usize,
    seed: u64,
) -> Vec<Vec<u32>> {
    debug_assert_eq!(inventory.len(), qualities.len());
    let mut out = Vec::new();
    if inventory.is_empty() || limit == 0 {
        return out;
    }
    let available: u32 = inventory.iter().sum();
    if available < total {
        return out;
    }

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut seen: HashSet<String> = HashSet::new();
    let max_attempts = (limit * 50).max(1);

    for _ in 0..max_attempts {
        if out.len() >= limit {
            break;
        }
        let mut remaining = inventory.to_vec();
        let mut counts = vec![0u32; inventory.len()];
        for _ in 0..total {
            let weight_total: f64 = remaining
                .iter()
                .zip(qualities.iter())
                .map(|(&r, &q)| f64::from(r) * q.max(1e-9))
                .sum();
            let mut pick = rng.random::<f64>() * weight_total;
            let mut chosen = remaining.len() - 1;
            for (i, (&r, &q)) in remaining.iter().zip(qualities.iter()).enumerate() {
                let w = f64::from(r) * q.max(1e-9);
                if w <= 0.0 {
                    continue;
                }
                if pick < w {
                    chosen = i;
                    break;
                }
                pick -= w;
            }
            if remaining[chosen] == 0 {
                // Float rounding can fall off the end of the weight walk.
                chosen = remaining.iter().position(|&r| r > 0).expect("dice left");
            }
            remaining[chosen] -= 1;
            counts[chosen] += 1;
        }
        let fingerprint = counts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        if seen.insert(fingerprint) {
            out.push(counts);
        }
    }
    out
}
