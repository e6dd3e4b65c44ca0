//! Stage-driven pruning workflow.
//!
//! The orchestrator runs the efficiency plan as a sequential filter cascade:
//! pilot stages evaluate candidates at low turn counts under per-stage seeds
//! and keep only the top slice per objective; the final stage re-evaluates
//! the survivors at full fidelity. Every stage is cache-aware: keys are
//! computed up front, hits are deserialized, and only misses fan out across
//! the worker pool. Results always preserve the stage's input order.
//!
//! A sidecar reporter thread (only when a progress sink is attached) emits
//! throttled progress events and always gets joined, error paths included.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::cache::key::{dice_signature, key_context, loadout_key};
use crate::cache::{CacheEntry, CacheStore, EntryKind};
use crate::cancel::CancellationToken;
use crate::dice::Catalog;
use crate::error::SolverError;
use crate::evaluator::evaluate_single;
use crate::perf::{NullPerfSink, PerfSink};
use crate::ranking::{objective_score, rank_results, Objective};
use crate::scoring::ScoreTable;
use crate::settings::{validate_stages, OptimizationSettings};
use crate::simulation::SimulationResult;

/// Throttled progress snapshot for one stage.
#[derive(Clone, Copy, Debug)]
pub struct ProgressEvent {
    pub stage_index: usize,
    pub stage_count: usize,
    pub stage_kind: EntryKind,
    pub processed: usize,
    pub total: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub elapsed_ms: u64,
}

/// Receiver for progress events. Implementations must tolerate being called
/// from a sidecar thread.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Per-stage timing and cache telemetry.
#[derive(Clone, Copy, Debug)]
pub struct StageTelemetry {
    pub stage_index: usize,
    pub kind: EntryKind,
    pub candidates: usize,
    pub evaluated: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub wall_ms: u64,
    pub eval_ms: u64,
    pub cache_load_ms: u64,
    pub cache_save_ms: u64,
    pub peak_pending: usize,
}

/// Aggregate telemetry for one workflow run.
#[derive(Clone, Debug, Default)]
pub struct OptimizationTelemetry {
    pub stages: Vec<StageTelemetry>,
    pub total_cache_hits: usize,
    pub total_cache_misses: usize,
    pub total_wall_ms: u64,
}

/// Run-scoped options.
#[derive(Clone)]
pub struct WorkflowOptions {
    /// Worker threads for miss evaluation, clamped to hardware parallelism.
    pub worker_count: usize,
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub cancel: CancellationToken,
    /// Progress cadence, clamped to 10..=5000 ms.
    pub progress_interval: Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            worker_count: 1,
            progress: None,
            cancel: CancellationToken::new(),
            progress_interval: Duration::from_millis(500),
        }
    }
}

/// Final ranked-stage results plus telemetry.
#[derive(Clone, Debug)]
pub struct WorkflowOutcome {
    pub results: Vec<SimulationResult>,
    pub telemetry: OptimizationTelemetry,
}

/// The pruning orchestrator. Holds the immutable evaluation context shared
/// by every worker: catalog, precomputed scoring table, cache, perf sink.
pub struct Workflow {
    catalog: Arc<Catalog>,
    table: Arc<ScoreTable>,
    cache: Arc<CacheStore>,
    perf: Arc<dyn PerfSink>,
}

impl Workflow {
    /// Build the workflow, precomputing the scoring table once.
    pub fn new(catalog: Arc<Catalog>, cache: Arc<CacheStore>) -> Self {
        Self {
            catalog,
            table: Arc::new(ScoreTable::build()),
            cache,
            perf: Arc::new(NullPerfSink),
        }
    }

    pub fn with_perf_sink(mut self, perf: Arc<dyn PerfSink>) -> Self {
        self.perf = perf;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Run the staged pruning workflow over the loadouts.
    ///
    /// With efficiency disabled (or a single candidate, or every stage
    /// skipped) this degenerates to one full-fidelity evaluation of all
    /// loadouts. Cancellation is checked at stage boundaries and before each
    /// loadout evaluation; on cancel the stage's cache save is skipped and
    /// `Canceled` propagates.
    pub fn run(
        &self,
        loadouts: &[Vec<u32>],
        settings: &OptimizationSettings,
        options: &WorkflowOptions,
    ) -> Result<WorkflowOutcome, SolverError> {
        validate_stages(&settings.stages)?;
        options.cancel.check()?;
        let t_run = Instant::now();
        let signature = dice_signature(&self.catalog);
        let mut telemetry = OptimizationTelemetry::default();

        let staged =
            settings.efficiency_enabled && loadouts.len() > 1 && !settings.stages.is_empty();

        if staged {
            let stage_count = settings.stages.len();
            let mut candidates: Vec<Vec<u32>> = loadouts.to_vec();
            let mut last_results: Option<Vec<SimulationResult>> = None;

            for (idx, stage) in settings.stages.iter().enumerate() {
                options.cancel.check()?;
                if candidates.len() < stage.min_total {
                    log::debug!(
                        "stage {idx}: skipped ({} candidates < min_total {})",
                        candidates.len(),
                        stage.min_total
                    );
                    continue;
                }
                let is_final = idx == stage_count - 1;
                let seed_base = if is_final {
                    None
                } else {
                    Some(settings.efficiency_seed + idx as u64)
                };
                let kind = if is_final {
                    EntryKind::Full
                } else {
                    EntryKind::Pilot
                };
                let mut stage_settings = settings.clone();
                stage_settings.num_turns = stage.pilot_turns;

                let results = self.evaluate_stage(
                    &candidates,
                    &stage_settings,
                    &signature,
                    seed_base,
                    kind,
                    idx,
                    stage_count,
                    options,
                    &mut telemetry,
                )?;
                candidates = filter_survivors(
                    &results,
                    settings.objective,
                    stage.keep_percent,
                    stage.epsilon,
                    stage.min_survivors,
                );
                log::info!(
                    "stage {idx} ({}): {} results, {} survivors",
                    kind.as_str(),
                    results.len(),
                    candidates.len()
                );
                last_results = Some(results);
                if candidates.len() <= 1 {
                    break;
                }
            }

            if let Some(results) = last_results {
                let survivors: HashSet<&[u32]> =
                    candidates.iter().map(Vec::as_slice).collect();
                let finals: Vec<SimulationResult> = results
                    .into_iter()
                    .filter(|r| survivors.contains(r.counts.as_slice()))
                    .collect();
                telemetry.total_wall_ms = t_run.elapsed().as_millis() as u64;
                return Ok(WorkflowOutcome {
                    results: finals,
                    telemetry,
                });
            }
            // Every stage was skipped: fall through to the flat evaluation.
        }

        let results = self.evaluate_stage(
            loadouts,
            settings,
            &signature,
            None,
            EntryKind::Full,
            0,
            1,
            options,
            &mut telemetry,
        )?;
        telemetry.total_wall_ms = t_run.elapsed().as_millis() as u64;
        Ok(WorkflowOutcome { results, telemetry })
    }

    /// Evaluate one stage: cache load, parallel dispatch of misses, cache
    /// save, collection in input order.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_stage(
        &self,
        candidates: &[Vec<u32>],
        stage_settings: &OptimizationSettings,
        signature: &str,
        seed_base: Option<u64>,
        kind: EntryKind,
        stage_index: usize,
        stage_count: usize,
        options: &WorkflowOptions,
        telemetry: &mut OptimizationTelemetry,
    ) -> Result<Vec<SimulationResult>, SolverError> {
        let t_stage = Instant::now();
        let context = key_context(signature, stage_settings, seed_base);
        let keys: Vec<String> = candidates
            .iter()
            .map(|counts| loadout_key(&context, counts))
            .collect();

        let t_load = Instant::now();
        let hit_payloads = self.cache.load(&keys);
        let cache_load_ms = t_load.elapsed().as_millis() as u64;

        let mut slots: Vec<Option<SimulationResult>> = vec![None; candidates.len()];
        let mut misses: Vec<(usize, &Vec<u32>, &String)> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match hit_payloads.get(key) {
                Some(payload) => match serde_json::from_slice::<SimulationResult>(payload) {
                    Ok(result) => slots[i] = Some(result),
                    Err(e) => {
                        log::warn!("cache payload for {key} undecodable, re-evaluating: {e}");
                        misses.push((i, &candidates[i], key));
                    }
                },
                None => misses.push((i, &candidates[i], key)),
            }
        }
        let cache_hits = candidates.len() - misses.len();
        let cache_misses = misses.len();
        let processed = Arc::new(AtomicUsize::new(cache_hits));

        let reporter = options.progress.as_ref().map(|sink| {
            ProgressReporter::start(
                Arc::clone(sink),
                options.progress_interval,
                ReporterContext {
                    stage_index,
                    stage_count,
                    stage_kind: kind,
                    total: candidates.len(),
                    cache_hits,
                    cache_misses,
                    processed: Arc::clone(&processed),
                    started: t_stage,
                },
            )
        });

        let t_eval = Instant::now();
        let mut computed: Vec<Option<(SimulationResult, Vec<u8>)>> = vec![None; misses.len()];
        let eval_outcome = self.dispatch_misses(
            &misses,
            &mut computed,
            stage_settings,
            seed_base,
            options,
            &processed,
        );
        let eval_ms = t_eval.elapsed().as_millis() as u64;

        // The reporter is joined on every path before errors propagate.
        if let Some(reporter) = reporter {
            reporter.stop();
        }
        eval_outcome?;

        let t_save = Instant::now();
        let mut entries = Vec::with_capacity(misses.len());
        for ((idx, _, key), slot) in misses.iter().zip(computed.into_iter()) {
            let (result, payload) = slot.expect("miss evaluated");
            entries.push(CacheEntry {
                key: (*key).clone(),
                kind,
                payload,
            });
            slots[*idx] = Some(result);
        }
        if let Err(e) = self.cache.save(entries) {
            log::warn!("cache save failed, continuing without persistence: {e}");
        }
        let cache_save_ms = t_save.elapsed().as_millis() as u64;

        let results: Vec<SimulationResult> = slots
            .into_iter()
            .map(|slot| slot.expect("every candidate resolved"))
            .collect();

        let wall_ms = t_stage.elapsed().as_millis() as u64;
        self.perf.observe_duration_ms("stage_wall_ms", wall_ms as f64);
        self.perf.observe_value("stage_cache_hits", cache_hits as f64);
        self.perf.observe_value("stage_cache_misses", cache_misses as f64);

        telemetry.stages.push(StageTelemetry {
            stage_index,
            kind,
            candidates: candidates.len(),
            evaluated: cache_misses,
            cache_hits,
            cache_misses,
            wall_ms,
            eval_ms,
            cache_load_ms,
            cache_save_ms,
            peak_pending: self.cache.stats().peak_pending,
        });
        telemetry.total_cache_hits += cache_hits;
        telemetry.total_cache_misses += cache_misses;

        Ok(results)
    }

    /// Fan misses out across the worker pool in dynamic chunks, writing into
    /// disjoint output slots.
    fn dispatch_misses(
        &self,
        misses: &[(usize, &Vec<u32>, &String)],
        computed: &mut [Option<(SimulationResult, Vec<u8>)>],
        stage_settings: &OptimizationSettings,
        seed_base: Option<u64>,
        options: &WorkflowOptions,
        processed: &AtomicUsize,
    ) -> Result<(), SolverError> {
        if misses.is_empty() {
            return Ok(());
        }
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = options.worker_count.clamp(1, hardware);
        let chunk = (misses.len() / (8 * workers)).max(16);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| SolverError::InvalidInput(format!("worker pool: {e}")))?;

        pool.install(|| {
            computed
                .par_chunks_mut(chunk)
                .zip(misses.par_chunks(chunk))
                .try_for_each(|(out_chunk, miss_chunk)| -> Result<(), SolverError> {
                    for (slot, (_, counts, _)) in out_chunk.iter_mut().zip(miss_chunk) {
                        options.cancel.check()?;
                        let result = evaluate_single(
                            counts,
                            &self.catalog,
                            &self.table,
                            stage_settings,
                            seed_base,
                        )?;
                        let payload = serde_json::to_vec(&result).map_err(|e| {
                            SolverError::InvalidInput(format!("serialize result: {e}"))
                        })?;
                        *slot = Some((result, payload));
                        processed.fetch_add(1, Ordering::Relaxed);
                        self.perf.increment("loadouts_evaluated");
                    }
                    Ok(())
                })
        })
    }
}

/// Rank results and keep the top slice, widened by epsilon around the
/// cutoff. Never returns an empty set for a non-empty input.
fn filter_survivors(
    results: &[SimulationResult],
    objective: Objective,
    keep_percent: f64,
    epsilon: f64,
    min_survivors: usize,
) -> Vec<Vec<u32>> {
    if results.is_empty() {
        return Vec::new();
    }
    let order = rank_results(results, objective);
    let len = results.len();
    let by_percent = ((len as f64) * keep_percent / 100.0).ceil() as usize;
    let keep = by_percent.max(min_survivors).min(len);
    let cutoff = &results[order[keep - 1]];

    let mut survivors: Vec<Vec<u32>> = Vec::new();
    match objective {
        Objective::MaxScore => {
            let cutoff_ev = cutoff.metrics.ev_turns;
            for &i in &order {
                if results[i].metrics.ev_turns <= cutoff_ev + epsilon {
                    survivors.push(results[i].counts.clone());
                }
            }
        }
        _ => {
            let cutoff_score = objective_score(cutoff, objective);
            for &i in &order {
                if objective_score(&results[i], objective) >= cutoff_score - epsilon {
                    survivors.push(results[i].counts.clone());
                }
            }
        }
    }
    if survivors.is_empty() {
        survivors.push(results[order[0]].counts.clone());
    }
    survivors
}

struct ReporterContext {
    stage_index: usize,
    stage_count: usize,
    stage_kind: EntryKind,
    total: usize,
    cache_hits: usize,
    cache_misses: usize,
    processed: Arc<AtomicUsize>,
    started: Instant,
}

impl ReporterContext {
    fn snapshot(&self) -> ProgressEvent {
        ProgressEvent {
            stage_index: self.stage_index,
            stage_count: self.stage_count,
            stage_kind: self.stage_kind,
            processed: self.processed.load(Ordering::Relaxed),
            total: self.total,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Sidecar thread emitting progress at the configured cadence plus one final
/// event when stopped.
struct ProgressReporter {
    handle: JoinHandle<()>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl ProgressReporter {
    fn start(sink: Arc<dyn ProgressSink>, interval: Duration, context: ReporterContext) -> Self {
        let interval = interval.clamp(Duration::from_millis(10), Duration::from_millis(5_000));
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_done = Arc::clone(&done);
        let handle = std::thread::Builder::new()
            .name("workflow-progress".to_string())
            .spawn(move || {
                let (lock, condvar) = &*thread_done;
                loop {
                    let guard = lock.lock().unwrap();
                    let (guard, _) = condvar.wait_timeout(guard, interval).unwrap();
                    let finished = *guard;
                    drop(guard);
                    sink.on_progress(&context.snapshot());
                    if finished {
                        break;
                    }
                }
            })
            .expect("spawn progress reporter");
        Self { handle, done }
    }

    /// Signal the reporter, which emits its final event, and join it.
    fn stop(self) {
        {
            let (lock, condvar) = &*self.done;
            *lock.lock().unwrap() = true;
            condvar.notify_all();
        }
        let _ = self.handle.join();
    }
}
