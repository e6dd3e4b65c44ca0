//! Optimization settings, the staged efficiency plan, and its validators.

use serde::{Deserialize, Serialize};

use crate::constants::{AGGRESSIVE_POLICY, BALANCED_POLICY, CONSERVATIVE_POLICY, RiskPolicy};
use crate::error::SolverError;
use crate::ranking::Objective;

/// Named risk profile selecting a [`RiskPolicy`] row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskProfile {
    pub fn policy(self) -> RiskPolicy {
        match self {
            RiskProfile::Conservative => CONSERVATIVE_POLICY,
            RiskProfile::Balanced => BALANCED_POLICY,
            RiskProfile::Aggressive => AGGRESSIVE_POLICY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Balanced => "balanced",
            RiskProfile::Aggressive => "aggressive",
        }
    }

    pub fn parse(text: &str) -> Result<Self, SolverError> {
        match text.to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "balanced" => Ok(RiskProfile::Balanced),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(SolverError::InvalidInput(format!(
                "unknown risk profile '{other}'"
            ))),
        }
    }
}

/// One row of the staged pruning plan.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyStage {
    /// Stage runs only when at least this many candidates remain.
    pub min_total: usize,
    /// Campaign length for this stage's evaluations.
    pub pilot_turns: u32,
    /// Percentage of candidates kept, in (0, 100].
    pub keep_percent: f64,
    /// Slack added around the cutoff score.
    pub epsilon: f64,
    /// Keep at least this many candidates regardless of percentage.
    pub min_survivors: usize,
}

/// Recommended staged plan: three pilot passes narrowing the field, then a
/// full-fidelity final pass over whatever is left.
pub fn default_stages() -> Vec<EfficiencyStage> {
    vec![
        EfficiencyStage {
            min_total: 100_000,
            pilot_turns: 100,
            keep_percent: 30.0,
            epsilon: 0.10,
            min_survivors: 100,
        },
        EfficiencyStage {
            min_total: 10_000,
            pilot_turns: 500,
            keep_percent: 10.0,
            epsilon: 0.05,
            min_survivors: 100,
        },
        EfficiencyStage {
            min_total: 1_000,
            pilot_turns: 1_000,
            keep_percent: 10.0,
            epsilon: 0.0,
            min_survivors: 100,
        },
        EfficiencyStage {
            min_total: 0,
            pilot_turns: 50_000,
            keep_percent: 100.0,
            epsilon: 0.0,
            min_survivors: 100,
        },
    ]
}

/// Everything a run needs besides the catalog and the loadout list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationSettings {
    /// Banking target per turn.
    pub target: u32,
    /// Per-turn score histogram bound; higher scores clamp into the top bin.
    pub score_cap: u32,
    /// Campaign length for flat (non-staged) evaluation.
    pub num_turns: u32,
    pub risk_profile: RiskProfile,
    pub objective: Objective,
    /// Reach-probability checkpoints reported in the metrics.
    pub prob_turns: Vec<u32>,
    /// Enables the staged pruning workflow.
    pub efficiency_enabled: bool,
    /// Base seed for pilot stages; stage i uses `efficiency_seed + i`.
    pub efficiency_seed: u64,
    pub stages: Vec<EfficiencyStage>,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            target: 2_000,
            score_cap: 4_000,
            num_turns: 10_000,
            risk_profile: RiskProfile::Balanced,
            objective: Objective::MaxScore,
            prob_turns: vec![10, 15, 20],
            efficiency_enabled: true,
            efficiency_seed: 42,
            stages: default_stages(),
        }
    }
}

/// Validate an efficiency plan, collecting every violation.
///
/// Per row: `min_total >= 0` (type-level), `pilot_turns >= 1`,
/// `keep_percent` in (0, 100], `epsilon >= 0`, `min_survivors >= 1`.
/// Across rows: `min_total` non-increasing, `pilot_turns` strictly
/// increasing.
pub fn validate_stages(stages: &[EfficiencyStage]) -> Result<(), SolverError> {
    let mut errors = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        if stage.pilot_turns < 1 {
            errors.push(format!("stage {i}: pilot_turns must be at least 1"));
        }
        if !(stage.keep_percent > 0.0 && stage.keep_percent <= 100.0) {
            errors.push(format!(
                "stage {i}: keep_percent {} outside (0, 100]",
                stage.keep_percent
            ));
        }
        if !(stage.epsilon >= 0.0) {
            errors.push(format!("stage {i}: epsilon {} negative", stage.epsilon));
        }
        if stage.min_survivors < 1 {
            errors.push(format!("stage {i}: min_survivors must be at least 1"));
        }
    }
    for (i, pair) in stages.windows(2).enumerate() {
        if pair[1].min_total > pair[0].min_total {
            errors.push(format!(
                "stage {}: min_total {} increases over previous {}",
                i + 1,
                pair[1].min_total,
                pair[0].min_total
            ));
        }
        if pair[1].pilot_turns <= pair[0].pilot_turns {
            errors.push(format!(
                "stage {}: pilot_turns {} does not increase over previous {}",
                i + 1,
                pair[1].pilot_turns,
                pair[0].pilot_turns
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SolverError::InvalidPlan(errors))
    }
}

/// Coerce a JSON value into f64, accepting numbers and numeric strings.
fn coerce_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalize heterogeneous external plan rows into [`EfficiencyStage`]s.
///
/// Numeric fields are coerced (numbers or numeric strings) and clamped into
/// their valid ranges; rows with uncoercible numerics are dropped and
/// reported in the returned error list.
pub fn normalize_stage_rows(
    rows: &[serde_json::Value],
) -> (Vec<EfficiencyStage>, Vec<String>) {
    let mut stages = Vec::new();
    let mut errors = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            errors.push(format!("row {i}: not an object"));
            continue;
        };
        let field = |name: &str| -> Option<f64> { obj.get(name).and_then(coerce_number) };

        let min_total = field("min_total");
        let pilot_turns = field("pilot_turns");
        let keep_percent = field("keep_percent");
        let epsilon = field("epsilon");
        let min_survivors = field("min_survivors");

        match (min_total, pilot_turns, keep_percent, epsilon, min_survivors) {
            (Some(mt), Some(pt), Some(kp), Some(eps), Some(ms)) => {
                stages.push(EfficiencyStage {
                    min_total: mt.max(0.0).round() as usize,
                    pilot_turns: pt.max(1.0).round() as u32,
                    keep_percent: kp.clamp(0.1, 100.0),
                    epsilon: eps.max(0.0),
                    min_survivors: ms.max(1.0).round() as usize,
                });
            }
            _ => {
                errors.push(format!("row {i}: missing or non-numeric fields"));
            }
        }
    }

    (stages, errors)
}
