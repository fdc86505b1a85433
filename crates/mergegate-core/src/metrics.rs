//! Global atomic counters for orchestration observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a review run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters shared by the scheduler, bus and orchestrator.
#[derive(Debug)]
pub struct Metrics {
    tasks_completed: AtomicU64,
    tasks_timed_out: AtomicU64,
    tasks_failed: AtomicU64,
    events_emitted: AtomicU64,
    events_evicted: AtomicU64,
    runs_merged: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_timed_out: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_evicted: AtomicU64::new(0),
            runs_merged: AtomicU64::new(0),
        }
    }

    /// Increment the tasks-completed counter by one.
    pub fn inc_tasks_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_completed", "counter incremented");
    }

    /// Increment the tasks-timed-out counter by one.
    pub fn inc_tasks_timed_out(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_timed_out", "counter incremented");
    }

    /// Increment the tasks-failed counter by one. Panics count as failures.
    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_failed", "counter incremented");
    }

    /// Increment the events-emitted counter by one.
    pub fn inc_events_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Called when the replay buffer drops its oldest event.
    pub fn inc_events_evicted(&self) {
        self.events_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the runs-merged counter by one.
    pub fn inc_runs_merged(&self) {
        self.runs_merged.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_merged", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, end of a delegation
    /// loop) rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tasks_completed = self.tasks_completed(),
            tasks_timed_out = self.tasks_timed_out(),
            tasks_failed = self.tasks_failed(),
            events_emitted = self.events_emitted(),
            events_evicted = self.events_evicted(),
            runs_merged = self.runs_merged(),
        );
    }

    /// Read the current tasks-completed count.
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed)
    }

    /// Read the current tasks-timed-out count.
    pub fn tasks_timed_out(&self) -> u64 {
        self.tasks_timed_out.load(Ordering::Relaxed)
    }

    /// Read the current tasks-failed count.
    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Read the current events-emitted count.
    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    /// Read the current events-evicted count.
    pub fn events_evicted(&self) -> u64 {
        self.events_evicted.load(Ordering::Relaxed)
    }

    /// Read the current runs-merged count.
    pub fn runs_merged(&self) -> u64 {
        self.runs_merged.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_timed_out.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.events_evicted.store(0, Ordering::Relaxed);
        self.runs_merged.store(0, Ordering::Relaxed);
    }
}
