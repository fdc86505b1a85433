//! Per-task report model.
//!
//! A [`TaskReport`] is what one review subagent hands back: its own severity,
//! the scope it looked at, proposed verification checks, findings, and a local
//! merge gate. [`TaskOutcome`] wraps a report with how it was obtained, so
//! timed-out and failed tasks still produce well-formed data.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ordered issue severity. `Merge` means "no issue".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Merge,
    Warning,
    Critical,
    Blocking,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Blocking => "blocking",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

/// Merge gate decision.
///
/// Task-local gates use `Approve`, `NeedsChanges` and `Block`; the aggregate
/// gate may additionally settle on `ApproveWithWarnings`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    #[default]
    Approve,
    ApproveWithWarnings,
    NeedsChanges,
    Block,
}

impl MergeDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ApproveWithWarnings => "approve_with_warnings",
            Self::NeedsChanges => "needs_changes",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision plus the items that justify it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeGate {
    pub decision: MergeDecision,
    #[serde(default)]
    pub must_fix: Vec<String>,
    #[serde(default)]
    pub should_fix: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl MergeGate {
    pub fn new(decision: MergeDecision) -> Self {
        Self {
            decision,
            ..Self::default()
        }
    }
}

/// One concrete issue reported by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    #[serde(default)]
    pub confidence: Confidence,
    /// Role that owns the fix (e.g. "security", "tests").
    #[serde(default)]
    pub owner: String,
    /// Rough size of the fix (e.g. "S", "M", "L").
    #[serde(default)]
    pub estimate: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_patch: Option<String>,
}

impl Finding {
    pub fn new(id: impl Into<String>, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            severity,
            confidence: Confidence::default(),
            owner: String::new(),
            estimate: String::new(),
            evidence: String::new(),
            risk: String::new(),
            recommendation: String::new(),
            suggested_patch: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    /// Identity used for de-duplication across tasks.
    pub fn dedup_key(&self) -> (&str, &str, Severity) {
        (&self.id, &self.title, self.severity)
    }
}

/// Files the task considered, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub relevant_files: Vec<String>,
    #[serde(default)]
    pub ignored_files: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// A verification check the task proposes (e.g. run the test suite).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

/// A check the task deliberately skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub name: String,
    #[serde(default)]
    pub reason: String,
}

/// Structured output of one review task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub agent: String,
    pub summary: String,
    /// Highest severity among `findings`, or `Merge` when there are none.
    /// Set by the task; the core does not recompute it.
    pub severity: Severity,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub checks: Vec<CheckRecord>,
    #[serde(default)]
    pub skips: Vec<SkipRecord>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub merge_gate: MergeGate,
}

pub const TIMEOUT_SUMMARY: &str = "Agent timed out";
pub const FAILURE_SUMMARY: &str = "Agent failed with exception";

impl TaskReport {
    /// An empty, approving report for `agent`.
    pub fn new(agent: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            summary: summary.into(),
            severity: Severity::Merge,
            scope: Scope::default(),
            checks: Vec::new(),
            skips: Vec::new(),
            findings: Vec::new(),
            merge_gate: MergeGate::new(MergeDecision::Approve),
        }
    }

    /// Attach findings and raise `severity` to their maximum.
    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.severity = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Merge);
        self.findings = findings;
        self
    }

    pub fn with_gate(mut self, gate: MergeGate) -> Self {
        self.merge_gate = gate;
        self
    }

    pub fn with_checks(mut self, checks: Vec<CheckRecord>) -> Self {
        self.checks = checks;
        self
    }

    pub fn timed_out(agent: impl Into<String>) -> Self {
        Self::synthetic(agent, TIMEOUT_SUMMARY, "Timeout")
    }

    pub fn failed(agent: impl Into<String>) -> Self {
        Self::synthetic(agent, FAILURE_SUMMARY, "Exception")
    }

    fn synthetic(agent: impl Into<String>, summary: &str, reasoning: &str) -> Self {
        Self {
            agent: agent.into(),
            summary: summary.to_string(),
            severity: Severity::Critical,
            scope: Scope {
                relevant_files: Vec::new(),
                ignored_files: Vec::new(),
                reasoning: reasoning.to_string(),
            },
            checks: Vec::new(),
            skips: Vec::new(),
            findings: Vec::new(),
            merge_gate: MergeGate::new(MergeDecision::NeedsChanges),
        }
    }
}

/// How a task's report was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(TaskReport),
    TimedOut {
        report: TaskReport,
        #[serde(with = "duration_ms")]
        timeout: Duration,
    },
    Failed {
        report: TaskReport,
        error: String,
    },
}

impl TaskOutcome {
    pub fn timed_out(agent: &str, timeout: Duration) -> Self {
        Self::TimedOut {
            report: TaskReport::timed_out(agent),
            timeout,
        }
    }

    pub fn failed(agent: &str, error: impl Into<String>) -> Self {
        Self::Failed {
            report: TaskReport::failed(agent),
            error: error.into(),
        }
    }

    pub fn report(&self) -> &TaskReport {
        match self {
            Self::Completed(report) => report,
            Self::TimedOut { report, .. } | Self::Failed { report, .. } => report,
        }
    }

    pub fn into_report(self) -> TaskReport {
        match self {
            Self::Completed(report) => report,
            Self::TimedOut { report, .. } | Self::Failed { report, .. } => report,
        }
    }

    pub fn agent(&self) -> &str {
        &self.report().agent
    }

    /// `true` for fallback reports produced by the scheduler.
    pub fn is_synthetic(&self) -> bool {
        !matches!(self, Self::Completed(_))
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::TimedOut { .. } => "timed_out",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::duration_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
