//! Structured observability hooks for the review run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: run start, task settle,
//!   merge decision, delegation-loop stagnation

use tracing::info;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("b0c1...");
/// // Every tracing call in this scope carries run_id = "b0c1..."
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("mergegate.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: review run started.
pub fn emit_review_started(run_id: &str, task_count: usize, max_concurrency: usize) {
    info!(
        event = "review.started",
        run_id = %run_id,
        task_count = task_count,
        max_concurrency = max_concurrency,
    );
}

/// Emit event: one task settled (completed, timed out, or failed).
pub fn emit_task_finished(agent: &str, status: &str, duration_ms: u64) {
    info!(
        event = "task.finished",
        agent = %agent,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: merge decision reached for a run.
pub fn emit_review_decided(run_id: &str, decision: &str, findings: usize, synthetic: usize) {
    info!(
        event = "review.decided",
        run_id = %run_id,
        decision = %decision,
        findings = findings,
        synthetic = synthetic,
    );
}

/// Emit event: a delegation iteration repeated the previous signature.
pub fn emit_loop_stagnated(iteration: usize, stagnation: u32) {
    tracing::debug!(
        event = "loop.stagnated",
        iteration = iteration,
        stagnation = stagnation,
    );
}
