//! Finding de-duplication and the merge decision policy.
//!
//! Everything here is pure and total: any slice of outcomes, including an
//! empty one or one made only of synthetic fallbacks, reduces to a
//! well-formed [`AggregateResult`].
//!
//! **Decision priority** (first match wins):
//! 1. any `blocking` finding → `block`
//! 2. non-empty must-fix list → `needs_changes`
//! 3. non-empty should-fix list → `approve_with_warnings`
//! 4. otherwise → `approve`

use std::collections::{BTreeSet, HashSet};

use crate::domain::aggregate::{AggregateResult, ToolPlan};
use crate::domain::report::{Finding, MergeDecision, MergeGate, Severity, TaskOutcome};

/// Command prefixes that rewrite code in place (formatters, `--fix` modes).
pub const AUTO_FIX_PREFIXES: &[&str] = &[
    "cargo fmt",
    "cargo clippy --fix",
    "cargo fix",
    "rustfmt",
    "ruff --fix",
    "ruff check --fix",
    "ruff format",
    "black",
    "isort",
    "autopep8",
    "prettier --write",
    "eslint --fix",
    "gofmt -w",
    "goimports -w",
];

/// Keep the first finding for each `(id, title, severity)`, in first-seen order.
pub fn dedupe_findings<'a, I>(findings: I) -> Vec<Finding>
where
    I: IntoIterator<Item = &'a Finding>,
{
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for finding in findings {
        if seen.insert(finding.dedup_key()) {
            kept.push(finding.clone());
        }
    }
    kept
}

/// Reduce per-task gates and findings into the aggregate gate.
///
/// Each report's own must-fix/should-fix strings are copied verbatim, and
/// every finding additionally contributes `"{title}: {recommendation}"`, so
/// an issue can appear twice in different wording. Synthetic outcomes add
/// `"{agent}: {summary}"` to must-fix so an unfinished review cannot approve.
pub fn compute_merge_decision(outcomes: &[TaskOutcome]) -> MergeGate {
    let mut must_fix = Vec::new();
    let mut should_fix = Vec::new();
    let mut has_blocking = false;

    for outcome in outcomes {
        let report = outcome.report();
        must_fix.extend(report.merge_gate.must_fix.iter().cloned());
        should_fix.extend(report.merge_gate.should_fix.iter().cloned());

        if outcome.is_synthetic() {
            must_fix.push(format!("{}: {}", report.agent, report.summary));
        }

        for finding in &report.findings {
            let line = format!("{}: {}", finding.title, finding.recommendation);
            match finding.severity {
                Severity::Blocking => {
                    has_blocking = true;
                    must_fix.push(line);
                }
                Severity::Critical => must_fix.push(line),
                Severity::Warning => should_fix.push(line),
                Severity::Merge => {}
            }
        }
    }

    let must_fix = dedupe_strings(must_fix);
    let should_fix = dedupe_strings(should_fix);

    let decision = if has_blocking {
        MergeDecision::Block
    } else if !must_fix.is_empty() {
        MergeDecision::NeedsChanges
    } else if !should_fix.is_empty() {
        MergeDecision::ApproveWithWarnings
    } else {
        MergeDecision::Approve
    };

    MergeGate {
        decision,
        must_fix,
        should_fix,
        notes: vec![format!("Merged {} agent results", outcomes.len())],
    }
}

/// Collect commands from required checks into one de-duplicated plan.
pub fn generate_tool_plan(outcomes: &[TaskOutcome]) -> ToolPlan {
    let commands: BTreeSet<String> = outcomes
        .iter()
        .flat_map(|o| o.report().checks.iter())
        .filter(|check| check.required)
        .flat_map(|check| check.commands.iter())
        .map(|cmd| cmd.trim().to_string())
        .filter(|cmd| !cmd.is_empty())
        .collect();

    let has_auto_fix = commands.iter().any(|cmd| is_auto_fix(cmd));
    let summary = format!("{} required verification command(s)", commands.len());

    ToolPlan {
        commands: commands.into_iter().collect(),
        has_auto_fix,
        summary,
    }
}

fn is_auto_fix(command: &str) -> bool {
    AUTO_FIX_PREFIXES.iter().any(|prefix| {
        command == *prefix
            || command
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(' '))
    })
}

/// Compose dedup, decision and tool plan into the run's aggregate.
pub fn aggregate(run_id: impl Into<String>, outcomes: Vec<TaskOutcome>) -> AggregateResult {
    let findings = dedupe_findings(outcomes.iter().flat_map(|o| o.report().findings.iter()));
    let merge_gate = compute_merge_decision(&outcomes);
    let tool_plan = generate_tool_plan(&outcomes);
    let summary = render_summary(&outcomes, &merge_gate, &findings);

    AggregateResult {
        run_id: run_id.into(),
        merge_gate,
        findings,
        tool_plan,
        outcomes,
        summary,
    }
}

fn render_summary(outcomes: &[TaskOutcome], gate: &MergeGate, findings: &[Finding]) -> String {
    let mut completed = 0;
    let mut timed_out = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Completed(_) => completed += 1,
            TaskOutcome::TimedOut { .. } => timed_out += 1,
            TaskOutcome::Failed { .. } => failed += 1,
        }
    }

    let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();

    format!(
        "{} agents ({} completed, {} timed out, {} failed); decision: {}; {} unique findings ({} blocking, {} critical, {} warning)",
        outcomes.len(),
        completed,
        timed_out,
        failed,
        gate.decision,
        findings.len(),
        count(Severity::Blocking),
        count(Severity::Critical),
        count(Severity::Warning),
    )
}

fn dedupe_strings(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::{CheckRecord, TaskReport};
    use std::time::Duration;

    fn finding(id: &str, severity: Severity) -> Finding {
        Finding::new(id, format!("title {id}"), severity).with_recommendation("fix it")
    }

    fn completed(agent: &str, findings: Vec<Finding>) -> TaskOutcome {
        TaskOutcome::Completed(TaskReport::new(agent, "done").with_findings(findings))
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let first = finding("F1", Severity::Warning).with_evidence("first");
        let second = finding("F1", Severity::Warning).with_evidence("second");
        let other = finding("F2", Severity::Warning);
        let kept = dedupe_findings([&first, &other, &second]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].evidence, "first");
        assert_eq!(kept[1].id, "F2");
    }

    #[test]
    fn test_dedupe_distinguishes_by_severity() {
        let a = finding("F1", Severity::Warning);
        let b = finding("F1", Severity::Critical);
        assert_eq!(dedupe_findings([&a, &b]).len(), 2);
    }

    #[test]
    fn test_empty_batch_approves() {
        let gate = compute_merge_decision(&[]);
        assert_eq!(gate.decision, MergeDecision::Approve);
        assert_eq!(gate.notes, vec!["Merged 0 agent results".to_string()]);
    }

    #[test]
    fn test_merge_severity_findings_contribute_nothing() {
        let gate = compute_merge_decision(&[completed("a", vec![finding("F1", Severity::Merge)])]);
        assert_eq!(gate.decision, MergeDecision::Approve);
        assert!(gate.must_fix.is_empty());
        assert!(gate.should_fix.is_empty());
    }

    #[test]
    fn test_gate_strings_and_finding_strings_both_counted() {
        let mut report = TaskReport::new("sec", "done")
            .with_findings(vec![finding("F1", Severity::Critical)]);
        report.merge_gate.must_fix = vec!["rotate the leaked key".to_string()];
        let gate = compute_merge_decision(&[TaskOutcome::Completed(report)]);
        assert_eq!(
            gate.must_fix,
            vec!["rotate the leaked key".to_string(), "title F1: fix it".to_string()]
        );
        assert_eq!(gate.decision, MergeDecision::NeedsChanges);
    }

    #[test]
    fn test_duplicate_strings_collapse() {
        let outcomes = vec![
            completed("a", vec![finding("F1", Severity::Warning)]),
            completed("b", vec![finding("F1", Severity::Warning)]),
        ];
        let gate = compute_merge_decision(&outcomes);
        assert_eq!(gate.should_fix.len(), 1);
        assert_eq!(gate.decision, MergeDecision::ApproveWithWarnings);
    }

    #[test]
    fn test_gate_only_should_fix_warns() {
        let mut report = TaskReport::new("style", "nits");
        report.merge_gate.should_fix = vec!["rename foo".to_string()];
        let gate = compute_merge_decision(&[TaskOutcome::Completed(report)]);
        assert_eq!(gate.decision, MergeDecision::ApproveWithWarnings);
    }

    #[test]
    fn test_synthetic_outcome_prevents_approval() {
        let outcomes = vec![
            completed("a", vec![]),
            TaskOutcome::timed_out("slow", Duration::from_secs(1)),
        ];
        let gate = compute_merge_decision(&outcomes);
        assert_eq!(gate.decision, MergeDecision::NeedsChanges);
        assert_eq!(gate.must_fix, vec!["slow: Agent timed out".to_string()]);
    }

    #[test]
    fn test_tool_plan_uses_required_checks_only() {
        let report = TaskReport::new("tests", "checks").with_checks(vec![
            CheckRecord {
                name: "unit".into(),
                required: true,
                commands: vec!["cargo test".into(), "cargo fmt --check".into()],
                rationale: String::new(),
            },
            CheckRecord {
                name: "bench".into(),
                required: false,
                commands: vec!["cargo bench".into()],
                rationale: String::new(),
            },
        ]);
        let other = TaskReport::new("lint", "checks").with_checks(vec![CheckRecord {
            name: "unit".into(),
            required: true,
            commands: vec!["cargo test".into()],
            rationale: String::new(),
        }]);
        let plan = generate_tool_plan(&[
            TaskOutcome::Completed(report),
            TaskOutcome::Completed(other),
        ]);
        assert_eq!(plan.commands, vec!["cargo fmt --check", "cargo test"]);
        assert!(plan.has_auto_fix);
        assert_eq!(plan.summary, "2 required verification command(s)");
    }

    #[test]
    fn test_auto_fix_prefix_matches_whole_words() {
        assert!(is_auto_fix("black"));
        assert!(is_auto_fix("black src/"));
        assert!(!is_auto_fix("blackbox-test"));
        assert!(!is_auto_fix("cargo test"));
    }

    #[test]
    fn test_aggregate_summary_counts_outcomes() {
        let outcomes = vec![
            completed("a", vec![finding("F1", Severity::Warning)]),
            TaskOutcome::failed("b", "boom"),
        ];
        let result = aggregate("run-1", outcomes);
        assert_eq!(result.run_id, "run-1");
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.findings.len(), 1);
        assert!(result.summary.starts_with("2 agents (1 completed, 0 timed out, 1 failed)"));
        assert!(result.summary.contains("decision: needs_changes"));
    }
}
