//! Loadout evaluation: single and batch entry points over the simulator.

use crate::cancel::CancellationToken;
use crate::dice::Catalog;
use crate::error::SolverError;
use crate::scoring::ScoreTable;
use crate::settings::OptimizationSettings;
use crate::simulation::{run_campaign, SimulationResult};

/// Evaluate one loadout with the given settings. `seed_base` selects the
/// deterministic seeded mode; `None` draws a clock seed.
pub fn evaluate_single(
    counts: &[u32],
    catalog: &Catalog,
    table: &ScoreTable,
    settings: &OptimizationSettings,
    seed_base: Option<u64>,
) -> Result<SimulationResult, SolverError> {
    run_campaign(catalog, table, counts, settings, seed_base)
}

/// Evaluate loadouts in order, checking for cancellation before each one.
/// A pre-canceled token fails immediately without evaluating anything.
pub fn evaluate_batch(
    loadouts: &[Vec<u32>],
    catalog: &Catalog,
    table: &ScoreTable,
    settings: &OptimizationSettings,
    seed_base: Option<u64>,
    cancel: &CancellationToken,
) -> Result<Vec<SimulationResult>, SolverError> {
    let mut results = Vec::with_capacity(loadouts.len());
    for counts in loadouts {
        cancel.check()?;
        results.push(evaluate_single(counts, catalog, table, settings, seed_base)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DieType;

    fn fair_catalog() -> Catalog {
        let sixth = 1.0 / 6.0;
        Catalog::from_dice(vec![
            DieType::from_probabilities(
                "Ordinary die",
                [0.0, sixth, sixth, sixth, sixth, sixth, sixth],
            )
            .unwrap(),
            DieType::from_probabilities("Shaved die", [0.0, 0.3, 0.1, 0.1, 0.1, 0.2, 0.2])
                .unwrap(),
        ])
        .unwrap()
    }

    fn quick_settings() -> OptimizationSettings {
        OptimizationSettings {
            num_turns: 200,
            ..OptimizationSettings::default()
        }
    }

    #[test]
    fn test_batch_preserves_order() {
        let catalog = fair_catalog();
        let table = ScoreTable::build();
        let loadouts = vec![vec![6, 0], vec![0, 6], vec![3, 3]];
        let results = evaluate_batch(
            &loadouts,
            &catalog,
            &table,
            &quick_settings(),
            Some(1),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(results.len(), 3);
        for (result, counts) in results.iter().zip(&loadouts) {
            assert_eq!(&result.counts, counts);
        }
    }

    #[test]
    fn test_precanceled_token_rejects_immediately() {
        // P12: no work happens under a pre-canceled token.
        let catalog = fair_catalog();
        let table = ScoreTable::build();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = evaluate_batch(
            &[vec![6, 0]],
            &catalog,
            &table,
            &quick_settings(),
            None,
            &cancel,
        );
        assert!(matches!(err, Err(SolverError::Canceled)));
    }

    #[test]
    fn test_single_rejects_bad_counts() {
        let catalog = fair_catalog();
        let table = ScoreTable::build();
        let err = evaluate_single(&[1, 1], &catalog, &table, &quick_settings(), None);
        assert!(matches!(err, Err(SolverError::InvalidInput(_))));
    }
}
