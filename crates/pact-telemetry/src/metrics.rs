//! Metric primitives and registry.
//!
//! Lightweight in-memory instruments backed by atomics. The registry hands
//! out clones sharing the same underlying value, so any holder of a name
//! observes the same series.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// An incrementing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// A counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by a given amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that moves in both directions.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicI64>,
}

impl Gauge {
    /// A gauge starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by one.
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Set to a specific value.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A histogram that keeps its raw observations.
///
/// Suited to in-process assertions and development; an exporter would bucket
/// these before shipping them anywhere.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    observations: Arc<RwLock<Vec<f64>>>,
}

impl Histogram {
    /// An empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation.
    pub fn observe(&self, value: f64) {
        self.observations.write().push(value);
    }

    /// Number of observations recorded.
    pub fn count(&self) -> usize {
        self.observations.read().len()
    }

    /// Sum of all observations.
    pub fn sum(&self) -> f64 {
        self.observations.read().iter().sum()
    }

    /// A copy of the raw observations, in recording order.
    pub fn samples(&self) -> Vec<f64> {
        self.observations.read().clone()
    }
}

/// Name-keyed instrument registry.
///
/// Cheap to clone; clones share the same instruments. One registry per
/// process is the normal arrangement, injected where instruments are needed.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<DashMap<&'static str, Counter>>,
    gauges: Arc<DashMap<&'static str, Gauge>>,
    histograms: Arc<DashMap<&'static str, Histogram>>,
}

impl MetricsRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter registered under `name`, created on first use.
    pub fn counter(&self, name: &'static str) -> Counter {
        self.counters.entry(name).or_default().clone()
    }

    /// The gauge registered under `name`, created on first use.
    pub fn gauge(&self, name: &'static str) -> Gauge {
        self.gauges.entry(name).or_default().clone()
    }

    /// The histogram registered under `name`, created on first use.
    pub fn histogram(&self, name: &'static str) -> Histogram {
        self.histograms.entry(name).or_default().clone()
    }
}
