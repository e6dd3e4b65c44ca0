//! End-to-end workflow scenarios: staged pruning, cache reuse, cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use farkle::cache::CacheStore;
use farkle::search::enumerate_loadouts;
use farkle::settings::EfficiencyStage;
use farkle::workflow::{ProgressEvent, ProgressSink};
use farkle::{
    CancellationToken, Catalog, DieType, Objective, OptimizationSettings, SolverError, Workflow,
    WorkflowOptions,
};

fn catalog() -> Catalog {
    let sixth = 1.0 / 6.0;
    Catalog::from_dice(vec![
        DieType::from_probabilities(
            "Ordinary die",
            [0.0, sixth, sixth, sixth, sixth, sixth, sixth],
        )
        .unwrap(),
        DieType::from_probabilities("Heavy die", [0.0, 0.4, 0.1, 0.1, 0.1, 0.2, 0.1]).unwrap(),
        DieType::from_probabilities("Even die", [0.0, 0.05, 0.25, 0.2, 0.25, 0.05, 0.2]).unwrap(),
    ])
    .unwrap()
}

/// Two short stages so staged runs finish quickly.
fn staged_settings() -> OptimizationSettings {
    OptimizationSettings {
        num_turns: 300,
        stages: vec![
            EfficiencyStage {
                min_total: 4,
                pilot_turns: 60,
                keep_percent: 50.0,
                epsilon: 0.0,
                min_survivors: 2,
            },
            EfficiencyStage {
                min_total: 0,
                pilot_turns: 200,
                keep_percent: 100.0,
                epsilon: 0.0,
                min_survivors: 2,
            },
        ],
        ..OptimizationSettings::default()
    }
}

fn loadouts() -> Vec<Vec<u32>> {
    enumerate_loadouts(&[6, 6, 6], 6, None)
}

fn workflow(dir: &TempDir) -> Workflow {
    let cache = Arc::new(CacheStore::open_default(dir.path()).unwrap());
    Workflow::new(Arc::new(catalog()), cache)
}

#[test]
fn test_staged_determinism_and_cache_reuse() {
    // P7 + S4: identical inputs give identical ordered survivors, and the
    // second run is served from the cache.
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let settings = staged_settings();
    let options = WorkflowOptions::default();
    let loadouts = loadouts();

    let first = workflow.run(&loadouts, &settings, &options).unwrap();
    let second = workflow.run(&loadouts, &settings, &options).unwrap();

    let first_counts: Vec<&Vec<u32>> = first.results.iter().map(|r| &r.counts).collect();
    let second_counts: Vec<&Vec<u32>> = second.results.iter().map(|r| &r.counts).collect();
    assert_eq!(first_counts, second_counts);
    assert!(second.telemetry.total_cache_hits > 0, "second run must hit");
    assert_eq!(second.telemetry.total_cache_misses, 0);

    // Cached payloads replay the exact metrics as well.
    for (a, b) in first.results.iter().zip(second.results.iter()) {
        assert_eq!(a.mean_points, b.mean_points);
        assert_eq!(a.tag_counts, b.tag_counts);
    }
}

#[test]
fn test_staged_prunes_candidates() {
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let settings = staged_settings();
    let loadouts = loadouts();

    let outcome = workflow
        .run(&loadouts, &settings, &WorkflowOptions::default())
        .unwrap();
    assert!(!outcome.results.is_empty());
    assert!(outcome.results.len() < loadouts.len(), "pruning must narrow");
    assert_eq!(outcome.telemetry.stages.len(), 2);
    // Stage results sum to candidates in, survivors out.
    assert_eq!(outcome.telemetry.stages[0].candidates, loadouts.len());
    assert!(outcome.telemetry.stages[1].candidates < loadouts.len());
}

#[test]
fn test_flat_mode_preserves_order() {
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let settings = OptimizationSettings {
        efficiency_enabled: false,
        num_turns: 150,
        ..staged_settings()
    };
    let loadouts = loadouts();

    let outcome = workflow
        .run(&loadouts, &settings, &WorkflowOptions::default())
        .unwrap();
    assert_eq!(outcome.results.len(), loadouts.len());
    for (result, counts) in outcome.results.iter().zip(&loadouts) {
        assert_eq!(&result.counts, counts);
    }
}

#[test]
fn test_all_stages_skipped_falls_back_to_flat() {
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let mut settings = staged_settings();
    settings.num_turns = 100;
    for stage in &mut settings.stages {
        stage.min_total = 1_000_000;
    }
    let loadouts = loadouts();

    let outcome = workflow
        .run(&loadouts, &settings, &WorkflowOptions::default())
        .unwrap();
    assert_eq!(outcome.results.len(), loadouts.len());
    assert_eq!(outcome.telemetry.stages.len(), 1);
}

#[test]
fn test_invalid_plan_refused() {
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let mut settings = staged_settings();
    settings.stages[1].pilot_turns = settings.stages[0].pilot_turns; // not increasing
    settings.stages[0].keep_percent = 0.0;

    let err = workflow
        .run(&loadouts(), &settings, &WorkflowOptions::default())
        .unwrap_err();
    let SolverError::InvalidPlan(messages) = err else {
        panic!("expected InvalidPlan");
    };
    assert_eq!(messages.len(), 2);
}

#[test]
fn test_precanceled_run_touches_nothing() {
    // P12: cancellation before run leaves the cache empty.
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(CacheStore::open_default(dir.path()).unwrap());
    let workflow = Workflow::new(Arc::new(catalog()), Arc::clone(&cache));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let options = WorkflowOptions {
        cancel,
        ..WorkflowOptions::default()
    };

    let err = workflow.run(&loadouts(), &staged_settings(), &options);
    assert!(matches!(err, Err(SolverError::Canceled)));
    assert!(cache.flush(Duration::from_secs(5)));
    assert_eq!(cache.persisted_count().unwrap(), 0);
}

#[test]
fn test_single_candidate_runs_flat() {
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let settings = staged_settings();

    let outcome = workflow
        .run(&[vec![6, 0, 0]], &settings, &WorkflowOptions::default())
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].counts, vec![6, 0, 0]);
    assert_eq!(outcome.telemetry.stages.len(), 1);
    assert_eq!(outcome.telemetry.stages[0].kind.as_str(), "full");
}

#[test]
fn test_objective_changes_survivors() {
    // Pattern objectives rank by tag frequency; the heavy-ones die should
    // dominate a SingleOne hunt.
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let mut settings = staged_settings();
    settings.objective = Objective::SingleOne;
    let loadouts = loadouts();

    let outcome = workflow
        .run(&loadouts, &settings, &WorkflowOptions::default())
        .unwrap();
    assert!(!outcome.results.is_empty());
    for result in &outcome.results {
        let singles = result.tag_counts.get("single_1").copied().unwrap_or(0);
        assert!(result.total_groups >= singles);
    }
}

/// Collects every progress event.
#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(*event);
    }
}

#[test]
fn test_progress_events_emitted() {
    let dir = TempDir::new().unwrap();
    let workflow = workflow(&dir);
    let sink = Arc::new(RecordingProgress::default());
    let options = WorkflowOptions {
        worker_count: 2,
        progress: Some(Arc::clone(&sink) as Arc<dyn ProgressSink>),
        progress_interval: Duration::from_millis(10),
        ..WorkflowOptions::default()
    };

    workflow
        .run(&loadouts(), &staged_settings(), &options)
        .unwrap();

    let events = sink.events.lock().unwrap();
    assert!(!events.is_empty(), "expected at least the final events");
    // Each stage's last event reports full completion.
    for stage_index in 0..2 {
        let last = events
            .iter()
            .filter(|e| e.stage_index == stage_index)
            .next_back()
            .expect("stage reported");
        assert_eq!(last.processed, last.total);
        assert_eq!(last.stage_count, 2);
        assert_eq!(last.cache_hits + last.cache_misses, last.total);
    }
}

#[test]
fn test_worker_count_does_not_change_results() {
    // Results are written to disjoint slots; parallelism is observationally
    // pure for seeded stages.
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let settings = staged_settings();
    let loadouts = loadouts();

    let serial = workflow(&dir_a)
        .run(
            &loadouts,
            &settings,
            &WorkflowOptions {
                worker_count: 1,
                ..WorkflowOptions::default()
            },
        )
        .unwrap();
    let parallel = workflow(&dir_b)
        .run(
            &loadouts,
            &settings,
            &WorkflowOptions {
                worker_count: 4,
                ..WorkflowOptions::default()
            },
        )
        .unwrap();

    let serial_counts: Vec<&Vec<u32>> = serial.results.iter().map(|r| &r.counts).collect();
    let parallel_counts: Vec<&Vec<u32>> = parallel.results.iter().map(|r| &r.counts).collect();
    assert_eq!(serial_counts, parallel_counts);
}
