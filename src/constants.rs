//! Game and engine constants: scoring values, packing widths, policy table.

/// Number of die faces.
pub const NUM_FACES: usize = 6;

/// Dice per loadout. Every feasible loadout is a 6-die multiset.
pub const LOADOUT_SIZE: usize = 6;

/// Points per scored single 1.
pub const SINGLE_ONE_POINTS: u32 = 100;

/// Points per scored single 5.
pub const SINGLE_FIVE_POINTS: u32 = 50;

/// Straight 1-2-3-4-5.
pub const STRAIGHT_1_5_POINTS: u32 = 500;

/// Straight 2-3-4-5-6.
pub const STRAIGHT_2_6_POINTS: u32 = 750;

/// Full straight 1-6.
pub const STRAIGHT_1_6_POINTS: u32 = 1500;

/// Of-a-kind base: score = base * (n - 2) for n >= 3 of face f.
#[inline(always)]
pub const fn kind_base(face: usize) -> u32 {
    if face == 1 {
        1000
    } else {
        100 * face as u32
    }
}

/// Bits per face in the packed face-count key.
pub const BITS_PER_FACE: u32 = 3;

/// Total packed-key space: 6 faces x 3 bits = 18 bits.
pub const PACKED_KEY_SPACE: usize = 1 << (BITS_PER_FACE as usize * NUM_FACES);

/// Penalty points weighting the bust term in the selection value function.
pub const BUST_PENALTY_POINTS: f64 = 500.0;

/// DP iteration stops once this reach probability is accumulated.
pub const REACH_EARLY_STOP: f64 = 0.995;

/// Default DP horizon in turns.
pub const DEFAULT_MAX_TURNS: u32 = 60;

/// Cache format version, embedded in every key context.
pub const CACHE_VERSION: u32 = 1;

/// Cache schema version, embedded in every key context.
pub const CACHE_SCHEMA: u32 = 1;

/// Risk policy: selection value = points + alpha * ev_k - beta * bust_k * 500,
/// banking at `bank_threshold` unless bust_k stays at or below `bust_limit`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskPolicy {
    pub alpha: f64,
    pub beta: f64,
    pub bank_threshold: u32,
    pub bust_limit: f64,
}

/// Conservative profile: bank early, weigh busts heavily.
pub const CONSERVATIVE_POLICY: RiskPolicy = RiskPolicy {
    alpha: 0.6,
    beta: 1.4,
    bank_threshold: 300,
    bust_limit: 0.25,
};

/// Balanced profile.
pub const BALANCED_POLICY: RiskPolicy = RiskPolicy {
    alpha: 0.8,
    beta: 1.1,
    bank_threshold: 200,
    bust_limit: 0.35,
};

/// Aggressive profile: keep rolling on thin margins.
pub const AGGRESSIVE_POLICY: RiskPolicy = RiskPolicy {
    alpha: 1.0,
    beta: 0.9,
    bank_threshold: 120,
    bust_limit: 0.45,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_base_values() {
        assert_eq!(kind_base(1), 1000);
        assert_eq!(kind_base(2), 200);
        assert_eq!(kind_base(5), 500);
        assert_eq!(kind_base(6), 600);
    }

    #[test]
    fn test_packed_key_space() {
        assert_eq!(PACKED_KEY_SPACE, 262_144);
    }
}
