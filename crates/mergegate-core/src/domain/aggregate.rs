//! Run-level aggregate types produced by the merge engine.

use serde::{Deserialize, Serialize};

use crate::domain::report::{Finding, MergeDecision, MergeGate, TaskOutcome};

/// Consolidated verification commands across all tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPlan {
    /// De-duplicated commands from required checks, sorted.
    pub commands: Vec<String>,
    /// Whether any command runs a formatter or an auto-fixer.
    pub has_auto_fix: bool,
    pub summary: String,
}

/// Final reduction of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub run_id: String,
    pub merge_gate: MergeGate,
    pub findings: Vec<Finding>,
    pub tool_plan: ToolPlan,
    /// One entry per task, in input order.
    pub outcomes: Vec<TaskOutcome>,
    pub summary: String,
}

impl AggregateResult {
    pub fn decision(&self) -> MergeDecision {
        self.merge_gate.decision
    }

    pub fn synthetic_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_synthetic()).count()
    }
}
