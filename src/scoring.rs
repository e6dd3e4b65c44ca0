//! Scoring-group engine: every undominated selection for every roll.
//!
//! A roll of up to 6 dice is reduced to a [`FaceCounts`] vector, packed into
//! an 18-bit key (3 bits per face). [`ScoreTable::build`] enumerates, for
//! every valid key, the full set of scoring selections reachable by combining
//! primitive groups (singles, of-a-kinds, straights), so the simulator's hot
//! path is a single array index.
//!
//! Selections with identical face consumption keep only the highest-scoring
//! variant; an empty selection list is a bust.

use std::collections::{BTreeMap, HashSet};

use crate::constants::{
    kind_base, BITS_PER_FACE, NUM_FACES, PACKED_KEY_SPACE, SINGLE_FIVE_POINTS, SINGLE_ONE_POINTS,
    STRAIGHT_1_5_POINTS, STRAIGHT_1_6_POINTS, STRAIGHT_2_6_POINTS,
};
use crate::error::SolverError;

/// Counts of each face (index 0 = face 1) in a roll. Each component 0..=6,
/// total 0..=6.
pub type FaceCounts = [u8; NUM_FACES];

/// Pack face counts into the 18-bit table key.
#[inline(always)]
pub fn pack_face_counts(counts: &FaceCounts) -> u32 {
    let mut key = 0u32;
    for (face, &c) in counts.iter().enumerate() {
        key |= u32::from(c) << (BITS_PER_FACE as usize * face);
    }
    key
}

/// Inverse of [`pack_face_counts`].
#[inline(always)]
pub fn unpack_face_counts(key: u32) -> FaceCounts {
    let mut counts = [0u8; NUM_FACES];
    for (face, c) in counts.iter_mut().enumerate() {
        *c = ((key >> (BITS_PER_FACE as usize * face)) & 0b111) as u8;
    }
    counts
}

/// Scoring-group tag. The string forms (`single_1`, `kind_3_4ok`,
/// `straight_2_6`, ...) key the per-campaign tag counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Single1,
    Single5,
    Kind { face: u8, n: u8 },
    Straight15,
    Straight26,
    Straight16,
}

impl Tag {
    pub fn label(&self) -> String {
        match self {
            Tag::Single1 => "single_1".to_string(),
            Tag::Single5 => "single_5".to_string(),
            Tag::Kind { face, n } => format!("kind_{face}_{n}ok"),
            Tag::Straight15 => "straight_1_5".to_string(),
            Tag::Straight26 => "straight_2_6".to_string(),
            Tag::Straight16 => "straight_1_6".to_string(),
        }
    }
}

/// One way to score a roll: which dice it consumes, the points it yields, and
/// the tagged groups it is built from.
///
/// Tag multiplicities count groups: each scored single is one group, each
/// of-a-kind or straight instance is one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreSelection {
    pub used_counts: FaceCounts,
    pub used_dice: u8,
    pub points: u32,
    pub tags: Vec<(Tag, u8)>,
}

/// A primitive scoring group before combination.
#[derive(Clone, Copy)]
struct Group {
    used: FaceCounts,
    points: u32,
    tag: Tag,
    mult: u8,
}

/// Precomputed selection table over all 18-bit packed keys.
///
/// Built once, shared read-only across workers. Keys that do not correspond
/// to a valid roll hold empty slices.
pub struct ScoreTable {
    table: Vec<Vec<ScoreSelection>>,
}

impl ScoreTable {
    /// Enumerate selections for every count vector summing 0..=6.
    pub fn build() -> Self {
        let mut table = vec![Vec::new(); PACKED_KEY_SPACE];
        let mut counts = [0u8; NUM_FACES];
        fill_keys(&mut table, &mut counts, 0, 6);
        Self { table }
    }

    /// Selections for a validated face-count vector. Empty slice means bust.
    pub fn selections(&self, counts: &FaceCounts) -> Result<&[ScoreSelection], SolverError> {
        let mut total = 0u32;
        for (face, &c) in counts.iter().enumerate() {
            if c > 6 {
                return Err(SolverError::InvalidInput(format!(
                    "face {} count {} exceeds 6",
                    face + 1,
                    c
                )));
            }
            total += u32::from(c);
        }
        if total > 6 {
            return Err(SolverError::InvalidInput(format!(
                "face counts total {total} exceeds 6"
            )));
        }
        Ok(&self.table[pack_face_counts(counts) as usize])
    }

    /// Hot-path lookup by packed key. The key must come from
    /// [`pack_face_counts`] on a valid roll.
    #[inline(always)]
    pub fn selections_packed(&self, key: u32) -> &[ScoreSelection] {
        debug_assert!((key as usize) < PACKED_KEY_SPACE, "key {key} out of range");
        &self.table[key as usize]
    }
}

/// Recursively assign every valid count vector its selection list.
fn fill_keys(
    table: &mut [Vec<ScoreSelection>],
    counts: &mut FaceCounts,
    face: usize,
    budget: u8,
) {
    if face == NUM_FACES {
        let key = pack_face_counts(counts) as usize;
        table[key] = enumerate_selections(counts);
        return;
    }
    for c in 0..=budget {
        counts[face] = c;
        fill_keys(table, counts, face + 1, budget - c);
    }
    counts[face] = 0;
}

/// Primitive groups available in a roll.
fn primitive_groups(counts: &FaceCounts) -> Vec<Group> {
    let mut groups = Vec::new();

    for n in 1..=counts[0] {
        let mut used = [0u8; NUM_FACES];
        used[0] = n;
        groups.push(Group {
            used,
            points: SINGLE_ONE_POINTS * u32::from(n),
            tag: Tag::Single1,
            mult: n,
        });
    }
    for n in 1..=counts[4] {
        let mut used = [0u8; NUM_FACES];
        used[4] = n;
        groups.push(Group {
            used,
            points: SINGLE_FIVE_POINTS * u32::from(n),
            tag: Tag::Single5,
            mult: n,
        });
    }
    for face in 1..=NUM_FACES {
        for n in 3..=counts[face - 1] {
            let mut used = [0u8; NUM_FACES];
            used[face - 1] = n;
            groups.push(Group {
                used,
                points: kind_base(face) * u32::from(n - 2),
                tag: Tag::Kind {
                    face: face as u8,
                    n,
                },
                mult: 1,
            });
        }
    }
    if counts[0] >= 1 && counts[1] >= 1 && counts[2] >= 1 && counts[3] >= 1 && counts[4] >= 1 {
        groups.push(Group {
            used: [1, 1, 1, 1, 1, 0],
            points: STRAIGHT_1_5_POINTS,
            tag: Tag::Straight15,
            mult: 1,
        });
    }
    if counts[1] >= 1 && counts[2] >= 1 && counts[3] >= 1 && counts[4] >= 1 && counts[5] >= 1 {
        groups.push(Group {
            used: [0, 1, 1, 1, 1, 1],
            points: STRAIGHT_2_6_POINTS,
            tag: Tag::Straight26,
            mult: 1,
        });
    }
    if counts.iter().all(|&c| c >= 1) {
        groups.push(Group {
            used: [1; NUM_FACES],
            points: STRAIGHT_1_6_POINTS,
            tag: Tag::Straight16,
            mult: 1,
        });
    }

    groups
}

/// All undominated selections for a count vector.
fn enumerate_selections(counts: &FaceCounts) -> Vec<ScoreSelection> {
    let groups = primitive_groups(counts);
    if groups.is_empty() {
        return Vec::new();
    }

    let mut seen: HashSet<(FaceCounts, u32, Vec<(Tag, u8)>)> = HashSet::new();
    let mut out: Vec<ScoreSelection> = Vec::new();
    let mut used = [0u8; NUM_FACES];
    let mut tags: BTreeMap<Tag, u8> = BTreeMap::new();
    combine(
        counts, &groups, 0, &mut used, 0, &mut tags, &mut seen, &mut out,
    );

    // Keep only the best points per exact face consumption.
    let mut best: BTreeMap<FaceCounts, u32> = BTreeMap::new();
    for sel in &out {
        let entry = best.entry(sel.used_counts).or_insert(sel.points);
        if sel.points > *entry {
            *entry = sel.points;
        }
    }
    out.retain(|sel| best[&sel.used_counts] == sel.points);

    out.sort_by(|a, b| {
        (a.points, a.used_counts, &a.tags).cmp(&(b.points, b.used_counts, &b.tags))
    });
    out
}

/// Depth-first combination of compatible groups. Groups may repeat (two
/// triples of the same face are two groups); tag multiplicities merge.
#[allow(clippy::too_many_arguments)]
fn combine(
    counts: &FaceCounts,
    groups: &[Group],
    start: usize,
    used: &mut FaceCounts,
    points: u32,
    tags: &mut BTreeMap<Tag, u8>,
    seen: &mut HashSet<(FaceCounts, u32, Vec<(Tag, u8)>)>,
    out: &mut Vec<ScoreSelection>,
) {
    for (i, group) in groups.iter().enumerate().skip(start) {
        let fits = used
            .iter()
            .zip(group.used.iter())
            .zip(counts.iter())
            .all(|((&u, &g), &c)| u + g <= c);
        if !fits {
            continue;
        }

        for (u, g) in used.iter_mut().zip(group.used.iter()) {
            *u += g;
        }
        *tags.entry(group.tag).or_insert(0) += group.mult;
        let new_points = points + group.points;

        let tag_vec: Vec<(Tag, u8)> = tags.iter().map(|(&t, &m)| (t, m)).collect();
        if seen.insert((*used, new_points, tag_vec.clone())) {
            out.push(ScoreSelection {
                used_counts: *used,
                used_dice: used.iter().sum(),
                points: new_points,
                tags: tag_vec,
            });
        }

        combine(counts, groups, i, used, new_points, tags, seen, out);

        match tags.get_mut(&group.tag) {
            Some(m) if *m > group.mult => *m -= group.mult,
            _ => {
                tags.remove(&group.tag);
            }
        }
        for (u, g) in used.iter_mut().zip(group.used.iter()) {
            *u -= g;
        }
    }
}
