//! Die types, the ordered catalog, and the catalog file loader.
//!
//! A [`DieType`] is a named face distribution over a six-sided die. The
//! [`Catalog`] is the canonical ordered sequence of die types (lexicographic
//! by name); loadouts reference it by parallel index everywhere else in the
//! engine.

use std::fs;
use std::path::Path;

use crate::constants::{LOADOUT_SIZE, NUM_FACES};
use crate::error::SolverError;

/// Probability tolerance for the face-sum check.
const PROB_SUM_TOLERANCE: f64 = 1e-9;

/// Tolerance for the index-0 slot (must be zero).
const ZERO_SLOT_TOLERANCE: f64 = 1e-12;

/// Tolerance under which faces count as equal for the uniform-die rule.
const UNIFORM_TOLERANCE: f64 = 1e-12;

/// Name of the canonical fair die that is always kept in inventory.
pub const ORDINARY_DIE_NAME: &str = "Ordinary die";

/// A weighted six-sided die.
///
/// `probabilities` is a length-7 vector where index 0 is zero and indices
/// 1..=6 hold the face probabilities, summing to 1. The cumulative
/// distribution over faces is precomputed for O(faces) sampling.
#[derive(Clone, Debug)]
pub struct DieType {
    name: String,
    probabilities: [f64; 7],
    cdf: [f64; NUM_FACES],
    quality: f64,
}

impl DieType {
    /// Validate and build a die type from its length-7 probability vector.
    pub fn from_probabilities(
        name: impl Into<String>,
        probabilities: [f64; 7],
    ) -> Result<Self, SolverError> {
        let name = name.into();
        if probabilities[0].abs() > ZERO_SLOT_TOLERANCE {
            return Err(SolverError::InvalidInput(format!(
                "die '{}': probability index 0 must be zero, got {}",
                name, probabilities[0]
            )));
        }
        let mut sum = 0.0;
        for (face, &p) in probabilities.iter().enumerate().skip(1) {
            if !(0.0..=1.0).contains(&p) || !p.is_finite() {
                return Err(SolverError::InvalidInput(format!(
                    "die '{}': face {} probability {} out of range",
                    name, face, p
                )));
            }
            sum += p;
        }
        if (sum - 1.0).abs() > PROB_SUM_TOLERANCE {
            return Err(SolverError::InvalidInput(format!(
                "die '{}': face probabilities sum to {}, expected 1",
                name, sum
            )));
        }

        let mut cdf = [0.0; NUM_FACES];
        let mut acc = 0.0;
        for face in 0..NUM_FACES {
            acc += probabilities[face + 1];
            cdf[face] = acc;
        }
        // Guard the top bucket against accumulated rounding.
        cdf[NUM_FACES - 1] = 1.0;

        let p = &probabilities;
        let quality = 100.0 * p[1] + 50.0 * p[5] + 20.0 * (p[2] + p[3] + p[4] + p[6]);

        Ok(Self {
            name,
            probabilities,
            cdf,
            quality,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probabilities(&self) -> &[f64; 7] {
        &self.probabilities
    }

    /// Cumulative face distribution, indexed by face-1.
    #[inline(always)]
    pub fn cdf(&self) -> &[f64; NUM_FACES] {
        &self.cdf
    }

    /// Scalar proxy for expected scoring usefulness, used as the tie-breaker
    /// when spending dice: quality = 100 p1 + 50 p5 + 20 (p2+p3+p4+p6).
    #[inline(always)]
    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// True when all six faces are equal within tolerance.
    pub fn is_uniform(&self) -> bool {
        let first = self.probabilities[1];
        self.probabilities[2..=6]
            .iter()
            .all(|&p| (p - first).abs() <= UNIFORM_TOLERANCE)
    }

    /// Sample a face (1..=6) from a uniform draw in [0, 1).
    #[inline(always)]
    pub fn sample_face(&self, u: f64) -> u8 {
        for face in 0..NUM_FACES {
            if u < self.cdf[face] {
                return (face + 1) as u8;
            }
        }
        NUM_FACES as u8
    }
}

/// Ordered sequence of die types, sorted lexicographically by name.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    dice: Vec<DieType>,
}

impl Catalog {
    /// Build a catalog, sorting by name and rejecting duplicates.
    pub fn from_dice(mut dice: Vec<DieType>) -> Result<Self, SolverError> {
        dice.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in dice.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(SolverError::InvalidInput(format!(
                    "duplicate die name '{}'",
                    pair[0].name
                )));
            }
        }
        Ok(Self { dice })
    }

    /// Parse the catalog file format: a JSON object mapping die names to
    /// length-7 probability arrays. Any root entry that is not such an array
    /// is rejected.
    pub fn from_json_str(text: &str) -> Result<Self, SolverError> {
        let root: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SolverError::InvalidInput(format!("catalog is not valid JSON: {e}")))?;
        let obj = root.as_object().ok_or_else(|| {
            SolverError::InvalidInput("catalog root must be a JSON object".to_string())
        })?;

        let mut dice = Vec::with_capacity(obj.len());
        for (name, value) in obj {
            let arr = value.as_array().ok_or_else(|| {
                SolverError::InvalidInput(format!("catalog entry '{name}' is not an array"))
            })?;
            if arr.len() != 7 {
                return Err(SolverError::InvalidInput(format!(
                    "catalog entry '{}' has {} elements, expected 7",
                    name,
                    arr.len()
                )));
            }
            let mut probs = [0.0f64; 7];
            for (i, v) in arr.iter().enumerate() {
                probs[i] = v.as_f64().ok_or_else(|| {
                    SolverError::InvalidInput(format!(
                        "catalog entry '{name}' element {i} is not a number"
                    ))
                })?;
            }
            dice.push(DieType::from_probabilities(name.clone(), probs)?);
        }
        Self::from_dice(dice)
    }

    /// Load and parse a catalog file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SolverError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            SolverError::InvalidInput(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.dice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dice.is_empty()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> &DieType {
        &self.dice[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DieType> {
        self.dice.iter()
    }

    /// Per-type quality vector, parallel to the catalog order.
    pub fn qualities(&self) -> Vec<f64> {
        self.dice.iter().map(DieType::quality).collect()
    }

    /// Search-time inventory: `per_die` of every die type, except that
    /// uniform dice are excluded (inventory 0) and the canonical
    /// [`ORDINARY_DIE_NAME`] is forced to a full loadout's worth.
    pub fn default_inventory(&self, per_die: u32) -> Vec<u32> {
        self.dice
            .iter()
            .map(|d| {
                if d.name == ORDINARY_DIE_NAME {
                    LOADOUT_SIZE as u32
                } else if d.is_uniform() {
                    0
                } else {
                    per_die
                }
            })
            .collect()
    }
}

/// Expand a count vector into the loadout's die indices (length 6).
pub fn expand_loadout(counts: &[u32]) -> Result<Vec<usize>, SolverError> {
    let total: u32 = counts.iter().sum();
    if total != LOADOUT_SIZE as u32 {
        return Err(SolverError::InvalidInput(format!(
            "loadout counts sum to {total}, expected {LOADOUT_SIZE}"
        )));
    }
    let mut indices = Vec::with_capacity(LOADOUT_SIZE);
    for (die, &count) in counts.iter().enumerate() {
        for _ in 0..count {
            indices.push(die);
        }
    }
    Ok(indices)
}
