//! Objective scoring, rank keys, and grouped tag presentation.
//!
//! For `MaxScore` the rank is `(ev_turns asc, ev_points desc)`; for pattern
//! objectives the rank is `(objective frequency desc, ev_turns asc)`. Both
//! are total orders over finite and infinite metric values.

use serde::{Deserialize, Serialize};

use crate::simulation::SimulationResult;

/// The rank function chosen by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Fewest expected turns to target (points-per-turn play).
    MaxScore,
    /// Frequency of single-1 groups.
    SingleOne,
    /// Frequency of single-5 groups.
    SingleFive,
    /// Frequency of the 1-5 straight.
    Straight15,
    /// Frequency of the 2-6 straight.
    Straight26,
    /// Frequency of the full 1-6 straight.
    Straight16,
    /// Frequency of any straight.
    StraightAny,
    /// Frequency of three-or-more of the given face.
    KindThreePlus(u8),
}

impl Objective {
    /// Parse the external objective spelling. Unknown names are invalid
    /// input, per the workflow's boundary validation.
    pub fn parse(text: &str) -> Result<Self, crate::error::SolverError> {
        let lowered = text.to_ascii_lowercase();
        match lowered.as_str() {
            "max_score" => return Ok(Objective::MaxScore),
            "single_one" => return Ok(Objective::SingleOne),
            "single_five" => return Ok(Objective::SingleFive),
            "straight_1_5" => return Ok(Objective::Straight15),
            "straight_2_6" => return Ok(Objective::Straight26),
            "straight_1_6" => return Ok(Objective::Straight16),
            "straight" => return Ok(Objective::StraightAny),
            _ => {}
        }
        if let Some(face) = lowered.strip_prefix("kind_") {
            if let Ok(face) = face.parse::<u8>() {
                if (1..=6).contains(&face) {
                    return Ok(Objective::KindThreePlus(face));
                }
            }
        }
        Err(crate::error::SolverError::InvalidInput(format!(
            "unknown objective '{text}'"
        )))
    }
}

/// Tag-frequency score of a result under an objective. `MaxScore` does not
/// use a frequency; it ranks by the metric tuple directly.
pub fn objective_score(result: &SimulationResult, objective: Objective) -> f64 {
    if result.total_groups == 0 {
        return 0.0;
    }
    let total = result.total_groups as f64;
    let tag = |name: &str| -> f64 {
        result.tag_counts.get(name).copied().unwrap_or(0) as f64
    };
    match objective {
        Objective::MaxScore => 0.0,
        Objective::SingleOne => tag("single_1") / total,
        Objective::SingleFive => tag("single_5") / total,
        Objective::Straight15 => tag("straight_1_5") / total,
        Objective::Straight26 => tag("straight_2_6") / total,
        Objective::Straight16 => tag("straight_1_6") / total,
        Objective::StraightAny => {
            (tag("straight_1_5") + tag("straight_2_6") + tag("straight_1_6")) / total
        }
        Objective::KindThreePlus(face) => {
            let prefix = format!("kind_{face}_");
            result
                .tag_counts
                .iter()
                .filter(|(name, _)| name.starts_with(&prefix))
                .map(|(_, &n)| n as f64)
                .sum::<f64>()
                / total
        }
    }
}

/// Ascending sort key: best result first.
pub fn rank_key(result: &SimulationResult, objective: Objective) -> (f64, f64) {
    match objective {
        Objective::MaxScore => (result.metrics.ev_turns, -result.metrics.ev_points),
        _ => (-objective_score(result, objective), result.metrics.ev_turns),
    }
}

/// Indices of `results` sorted best-first under the objective.
pub fn rank_results(results: &[SimulationResult], objective: Objective) -> Vec<usize> {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| {
        let ka = rank_key(&results[a], objective);
        let kb = rank_key(&results[b], objective);
        ka.0.total_cmp(&kb.0).then(ka.1.total_cmp(&kb.1))
    });
    order
}

/// Integer percentages of scoring groups per UI bucket, rounded half-to-even.
///
/// Buckets: `1_ok` singles, `3_ok`..`6_ok` of-a-kinds by size, `5_s` the two
/// five-long straights, `6_s` the full straight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupedHandPercentages {
    pub single_ok: u32,
    pub triple_ok: u32,
    pub quad_ok: u32,
    pub quint_ok: u32,
    pub sext_ok: u32,
    pub straight5: u32,
    pub straight6: u32,
}

impl GroupedHandPercentages {
    pub fn from_result(result: &SimulationResult) -> Self {
        Self::from_tags(&result.tag_counts, result.total_groups)
    }

    pub fn from_tags(
        tag_counts: &std::collections::BTreeMap<String, u64>,
        total_groups: u64,
    ) -> Self {
        if total_groups == 0 {
            return Self::default();
        }
        let mut singles = 0u64;
        let mut kinds = [0u64; 4]; // n = 3..=6
        let mut straight5 = 0u64;
        let mut straight6 = 0u64;
        for (name, &count) in tag_counts {
            if name == "single_1" || name == "single_5" {
                singles += count;
            } else if name == "straight_1_5" || name == "straight_2_6" {
                straight5 += count;
            } else if name == "straight_1_6" {
                straight6 += count;
            } else if let Some(n) = kind_size(name) {
                kinds[n as usize - 3] += count;
            }
        }
        let pct = |count: u64| percent_half_even(count, total_groups);
        Self {
            single_ok: pct(singles),
            triple_ok: pct(kinds[0]),
            quad_ok: pct(kinds[1]),
            quint_ok: pct(kinds[2]),
            sext_ok: pct(kinds[3]),
            straight5: pct(straight5),
            straight6: pct(straight6),
        }
    }
}

/// Extract n from a `kind_<face>_<n>ok` tag name.
fn kind_size(name: &str) -> Option<u8> {
    let rest = name.strip_prefix("kind_")?;
    let (_, n_part) = rest.split_once('_')?;
    let n = n_part.strip_suffix("ok")?.parse::<u8>().ok()?;
    (3..=6).contains(&n).then_some(n)
}

/// 100 * count / total as an integer, rounding halves to even.
fn percent_half_even(count: u64, total: u64) -> u32 {
    let value = 100.0 * count as f64 / total as f64;
    let floor = value.floor();
    let diff = value - floor;
    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if (floor as u64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    };
    rounded as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TurnMetrics;
    use std::collections::BTreeMap;

    fn result_with(
        ev_turns: f64,
        ev_points: f64,
        tags: &[(&str, u64)],
        total_groups: u64,
    ) -> SimulationResult {
        SimulationResult {
            counts: vec![6],
            metrics: TurnMetrics {
                ev_turns,
                p_within: BTreeMap::new(),
                ev_points,
                p50_turns: ev_turns,
                p90_turns: ev_turns,
                ev_points_se: 0.0,
            },
            mean_points: ev_points,
            std_dev: 0.0,
            tag_counts: tags.iter().map(|&(k, v)| (k.to_string(), v)).collect(),
            total_groups,
            scoring_turns: 1,
        }
    }

    #[test]
    fn test_max_score_rank_order() {
        // P11: lower ev_turns wins; ties broken by higher ev_points.
        let results = vec![
            result_with(12.0, 300.0, &[], 0),
            result_with(10.0, 200.0, &[], 0),
            result_with(10.0, 400.0, &[], 0),
        ];
        let order = rank_results(&results, Objective::MaxScore);
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_infinite_metrics_rank_last() {
        let results = vec![
            result_with(f64::INFINITY, 0.0, &[], 0),
            result_with(9.0, 100.0, &[], 0),
        ];
        let order = rank_results(&results, Objective::MaxScore);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn test_pattern_objective_rank_order() {
        let results = vec![
            result_with(10.0, 100.0, &[("single_1", 5)], 10),
            result_with(12.0, 100.0, &[("single_1", 8)], 10),
            result_with(11.0, 100.0, &[("single_1", 8)], 10),
        ];
        let order = rank_results(&results, Objective::SingleOne);
        // Higher frequency first; ties by lower ev_turns.
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_kind_prefix_sums() {
        let result = result_with(
            10.0,
            100.0,
            &[("kind_3_3ok", 2), ("kind_3_4ok", 1), ("kind_2_3ok", 4)],
            10,
        );
        assert!((objective_score(&result, Objective::KindThreePlus(3)) - 0.3).abs() < 1e-12);
        assert!((objective_score(&result, Objective::KindThreePlus(2)) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_straight_any_sums_all_three() {
        let result = result_with(
            10.0,
            100.0,
            &[("straight_1_5", 1), ("straight_2_6", 2), ("straight_1_6", 3)],
            12,
        );
        assert!((objective_score(&result, Objective::StraightAny) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_grouped_percentages_scenario() {
        // S7.
        let tags: BTreeMap<String, u64> = [
            ("single_1", 10u64),
            ("kind_1_3ok", 5),
            ("kind_2_4ok", 3),
            ("kind_3_5ok", 2),
            ("kind_4_6ok", 1),
            ("straight_1_5", 4),
            ("straight_1_6", 2),
        ]
        .iter()
        .map(|&(k, v)| (k.to_string(), v))
        .collect();
        let grouped = GroupedHandPercentages::from_tags(&tags, 27);
        assert_eq!(grouped.single_ok, 37);
        assert_eq!(grouped.triple_ok, 19);
        assert_eq!(grouped.quad_ok, 11);
        assert_eq!(grouped.quint_ok, 7);
        assert_eq!(grouped.sext_ok, 4);
        assert_eq!(grouped.straight5, 15);
        assert_eq!(grouped.straight6, 7);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(percent_half_even(1, 8), 12); // 12.5 -> 12
        assert_eq!(percent_half_even(3, 8), 38); // 37.5 -> 38
        assert_eq!(percent_half_even(1, 4), 25);
    }

    #[test]
    fn test_objective_parse() {
        assert_eq!(Objective::parse("max_score").unwrap(), Objective::MaxScore);
        assert_eq!(
            Objective::parse("kind_4").unwrap(),
            Objective::KindThreePlus(4)
        );
        assert!(Objective::parse("kind_7").is_err());
        assert!(Objective::parse("points").is_err());
    }
}
