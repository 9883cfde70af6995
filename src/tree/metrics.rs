//! Activity counters for the history tree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking history tree activity.
///
/// Implementations receive a call for every node written or read and every
/// interval or query served, and can feed monitoring or profiling.
pub trait TreeMetrics: Send + Sync {
    /// Records a node block written to the backing file.
    fn node_written(&self);

    /// Records a node lookup.
    ///
    /// # Parameters
    /// * `cached` - Whether the node was served from the node cache.
    fn node_read(&self, cached: bool);

    /// Records an accepted interval.
    ///
    /// # Parameters
    /// * `level` - Level of the node that absorbed the interval (0 = leaf).
    fn interval_inserted(&self, level: u16);

    /// Records a point or range query.
    fn query_run(&self);
}

/// A no-op implementation of [`TreeMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl TreeMetrics for NoopMetrics {
    fn node_written(&self) {}
    fn node_read(&self, _cached: bool) {}
    fn interval_inserted(&self, _level: u16) {}
    fn query_run(&self) {}
}

/// A thread-safe counter-based implementation of [`TreeMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Node blocks written.
    pub nodes_written: AtomicU64,

    /// Node lookups served from the cache.
    pub node_cache_hits: AtomicU64,

    /// Node lookups that read the backing file.
    pub node_cache_misses: AtomicU64,

    /// Intervals stored in leaves.
    pub leaf_inserts: AtomicU64,

    /// Intervals that had to be stored in a branch node.
    pub branch_inserts: AtomicU64,

    /// Queries started.
    pub queries: AtomicU64,
}

impl TreeMetrics for CounterMetrics {
    fn node_written(&self) {
        self.nodes_written.fetch_add(1, Ordering::Relaxed);
    }

    fn node_read(&self, cached: bool) {
        if cached {
            self.node_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.node_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn interval_inserted(&self, level: u16) {
        if level == 0 {
            self.leaf_inserts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.branch_inserts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn query_run(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, which discards everything.
pub fn default_metrics() -> Arc<dyn TreeMetrics> {
    Arc::new(NoopMetrics)
}
