//! Domain model for mergegate.
//!
//! - `TaskReport` / `TaskOutcome`: what a review task produces
//! - `Finding`, `Severity`, `MergeGate`: the merge vocabulary
//! - `AggregateResult`, `ToolPlan`: the reduction of one run
//! - `ReviewInput`, `TaskContext`: what tasks consume

pub mod aggregate;
pub mod error;
pub mod input;
pub mod report;

pub use aggregate::{AggregateResult, ToolPlan};
pub use error::{OrchestratorError, OrchestratorResult};
pub use input::{ReviewInput, TaskContext};
pub use report::{
    CheckRecord, Confidence, Finding, MergeDecision, MergeGate, Scope, Severity, SkipRecord,
    TaskOutcome, TaskReport, FAILURE_SUMMARY, TIMEOUT_SUMMARY,
};
