//! Performance-observation capability.
//!
//! The engine reports counters and timings through a [`PerfSink`] so that
//! benchmark and test harnesses can record them while production paths pay
//! nothing: the default [`NullPerfSink`] compiles down to empty calls.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Pluggable metrics receiver. Implementations must be cheap and non-blocking;
/// the workflow calls these from hot paths.
pub trait PerfSink: Send + Sync {
    /// Bump a named counter by one.
    fn increment(&self, name: &str);

    /// Record a duration in milliseconds under a name.
    fn observe_duration_ms(&self, name: &str, ms: f64);

    /// Record an arbitrary value under a name.
    fn observe_value(&self, name: &str, value: f64);
}

/// Sink that discards all observations.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPerfSink;

impl PerfSink for NullPerfSink {
    #[inline(always)]
    fn increment(&self, _name: &str) {}

    #[inline(always)]
    fn observe_duration_ms(&self, _name: &str, _ms: f64) {}

    #[inline(always)]
    fn observe_value(&self, _name: &str, _value: f64) {}
}

/// Recording sink for tests and benchmarks.
#[derive(Debug, Default)]
pub struct RecordingPerfSink {
    counters: Mutex<BTreeMap<String, u64>>,
    values: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl RecordingPerfSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        *self.counters.lock().unwrap().get(name).unwrap_or(&0)
    }

    /// All recorded values for a name, in observation order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.values
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl PerfSink for RecordingPerfSink {
    fn increment(&self, name: &str) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0) += 1;
    }

    fn observe_duration_ms(&self, name: &str, ms: f64) {
        self.observe_value(name, ms);
    }

    fn observe_value(&self, name: &str, value: f64) {
        self.values
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
