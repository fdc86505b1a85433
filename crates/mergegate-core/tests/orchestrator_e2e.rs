//! End-to-end runs through the orchestrator façade and the delegation loop.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use mergegate_core::{
    run_until_converged, run_until_converged_with, DelegationConfig, Finding, MergeDecision,
    Orchestrator, OrchestratorConfig, OrchestratorError, ReviewInput, ReviewTask, Severity,
    StopReason, StreamEvent, TaskContext, TaskReport, TaskSet,
};
use tokio::time::{sleep, Duration, Instant};

struct FixedTask {
    name: &'static str,
    findings: Vec<Finding>,
}

#[async_trait]
impl ReviewTask for FixedTask {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, context: TaskContext) -> anyhow::Result<TaskReport> {
        Ok(TaskReport::new(
            self.name,
            format!("reviewed {} files", context.changed_files.len()),
        )
        .with_findings(self.findings.clone()))
    }
}

struct HangingTask(&'static str);

#[async_trait]
impl ReviewTask for HangingTask {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, _context: TaskContext) -> anyhow::Result<TaskReport> {
        sleep(Duration::from_secs(3_600)).await;
        Ok(TaskReport::new(self.0, "never"))
    }
}

/// Produces a different summary on every call, so it never stagnates.
struct ChangingTask {
    calls: AtomicUsize,
}

#[async_trait]
impl ReviewTask for ChangingTask {
    fn name(&self) -> &str {
        "changing"
    }

    async fn run(&self, _context: TaskContext) -> anyhow::Result<TaskReport> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskReport::new("changing", format!("pass {call}")))
    }
}

fn fixed(name: &'static str, findings: Vec<Finding>) -> Arc<dyn ReviewTask> {
    Arc::new(FixedTask { name, findings })
}

fn orchestrator(timeout_ms: u64) -> Orchestrator {
    Orchestrator::new(OrchestratorConfig {
        max_concurrency: 2,
        task_timeout_ms: timeout_ms,
        ..OrchestratorConfig::default()
    })
    .unwrap()
}

fn input() -> ReviewInput {
    ReviewInput::new(vec!["src/lib.rs".into(), "src/db.rs".into()], "diff --git a/src/lib.rs")
}

#[tokio::test]
async fn run_with_progress_reports_every_agent() {
    let tasks = TaskSet::builder()
        .register_all([
            fixed("security", vec![]),
            fixed("perf", vec![]),
            fixed("style", vec![]),
        ])
        .unwrap()
        .build()
        .unwrap();

    let seen: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let result = orchestrator(5_000)
        .run_with_progress(&tasks, input(), move |event| {
            sink.lock().unwrap().push(event.clone());
        })
        .await
        .unwrap();

    assert_eq!(result.decision(), MergeDecision::Approve);
    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(result.outcomes[0].report().summary, "reviewed 2 files");

    let events = seen.lock().unwrap();
    for agent in ["security", "perf", "style"] {
        let kinds: Vec<&str> = events
            .iter()
            .filter(|e| e.agent() == agent)
            .map(|e| e.kind_str())
            .collect();
        assert_eq!(kinds.first(), Some(&"started"), "{agent}");
        assert!(kinds.contains(&"completed"), "{agent}");
    }
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test(start_paused = true)]
async fn all_agents_timing_out_needs_changes() {
    let tasks = TaskSet::builder()
        .register_all([
            Arc::new(HangingTask("security")) as Arc<dyn ReviewTask>,
            Arc::new(HangingTask("perf")),
        ])
        .unwrap()
        .build()
        .unwrap();

    let result = orchestrator(1_000).run(&tasks, input()).await.unwrap();

    assert_eq!(result.decision(), MergeDecision::NeedsChanges);
    assert_eq!(result.synthetic_count(), 2);
    assert!(result.outcomes.iter().all(|o| o.status_str() == "timed_out"));
    assert!(result.summary.contains("2 timed out"));
}

#[tokio::test(start_paused = true)]
async fn one_hanging_agent_does_not_hide_blocking_finding() {
    let tasks = TaskSet::builder()
        .register_all([
            fixed(
                "security",
                vec![Finding::new("SEC-1", "hardcoded secret", Severity::Blocking)
                    .with_recommendation("move to vault")],
            ),
            Arc::new(HangingTask("perf")) as Arc<dyn ReviewTask>,
            fixed(
                "style",
                vec![Finding::new("STY-1", "naming", Severity::Warning)],
            ),
        ])
        .unwrap()
        .build()
        .unwrap();

    let result = orchestrator(1_000).run(&tasks, input()).await.unwrap();

    assert_eq!(result.decision(), MergeDecision::Block);
    assert_eq!(result.findings.len(), 2);
    assert!(result
        .merge_gate
        .must_fix
        .contains(&"hardcoded secret: move to vault".to_string()));
    assert!(result.merge_gate.must_fix.contains(&"perf: Agent timed out".to_string()));
}

#[tokio::test]
async fn warnings_only_approve_with_warnings() {
    let tasks = TaskSet::builder()
        .register(fixed(
            "style",
            vec![Finding::new("STY-1", "naming", Severity::Warning).with_recommendation("rename")],
        ))
        .unwrap()
        .build()
        .unwrap();

    let result = orchestrator(5_000).run(&tasks, input()).await.unwrap();
    assert_eq!(result.decision(), MergeDecision::ApproveWithWarnings);
    assert_eq!(result.merge_gate.should_fix, vec!["naming: rename".to_string()]);
}

#[tokio::test]
async fn sequential_runs_each_get_their_own_stream() {
    let orchestrator = orchestrator(5_000);
    let tasks = TaskSet::builder()
        .register(fixed("security", vec![]))
        .unwrap()
        .build()
        .unwrap();

    orchestrator.run(&tasks, input()).await.unwrap();
    let first = orchestrator.event_bus().snapshot();
    orchestrator.run(&tasks, input()).await.unwrap();
    let second = orchestrator.event_bus().snapshot();

    assert_eq!(first.len(), second.len());
    assert!(second[0].seq > first.last().unwrap().seq);
    assert!(orchestrator.event_bus().is_closed());
}

#[tokio::test(start_paused = true)]
async fn overlapping_runs_keep_their_progress_separate() {
    let orchestrator = orchestrator(10_000);
    let fast = TaskSet::builder()
        .register(fixed("fast", vec![]))
        .unwrap()
        .build()
        .unwrap();
    let slow = TaskSet::builder()
        .register(Arc::new(HangingTask("slow")))
        .unwrap()
        .build()
        .unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let began = Instant::now();
    let fast_run = async {
        let result = orchestrator
            .run_with_progress(&fast, input(), move |event| {
                sink.lock().unwrap().push(event.agent().to_string());
            })
            .await;
        (result, began.elapsed())
    };

    let ((fast_result, fast_elapsed), slow_result) =
        tokio::join!(fast_run, orchestrator.run(&slow, input()));

    assert!(
        fast_elapsed < Duration::from_secs(1),
        "fast run waited {fast_elapsed:?} on the slow one"
    );
    assert_eq!(fast_result.unwrap().decision(), MergeDecision::Approve);
    assert_eq!(slow_result.unwrap().decision(), MergeDecision::NeedsChanges);

    let agents = seen.lock().unwrap();
    assert_eq!(agents.len(), 3);
    assert!(agents.iter().all(|a| a == "fast"), "foreign events: {agents:?}");

    // The shared bus kept both runs' events in one session.
    let bus = orchestrator.event_bus();
    assert!(bus.is_closed());
    let buffered = bus.snapshot();
    assert!(buffered.iter().any(|e| e.agent() == "fast"));
    assert!(buffered.iter().any(|e| e.agent() == "slow"));
}

#[tokio::test]
async fn progress_callback_is_not_limited_by_replay_buffer() {
    let orchestrator = Orchestrator::new(OrchestratorConfig {
        stream_buffer_size: 2,
        ..OrchestratorConfig::default()
    })
    .unwrap();
    let tasks = TaskSet::builder()
        .register_all([
            fixed("security", vec![]),
            fixed("perf", vec![]),
            fixed("style", vec![]),
        ])
        .unwrap()
        .build()
        .unwrap();

    let kinds: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    orchestrator
        .run_with_progress(&tasks, input(), move |event| {
            sink.lock().unwrap().push(event.kind_str());
        })
        .await
        .unwrap();

    let kinds = kinds.lock().unwrap();
    let count = |kind: &str| kinds.iter().filter(|k| **k == kind).count();
    assert_eq!(kinds.len(), 9);
    assert_eq!(count("started"), 3);
    assert_eq!(count("completed"), 3);
    assert_eq!(count("progress"), 3);
    assert_eq!(orchestrator.event_bus().snapshot().len(), 2);
}

// ---- delegation loop ----

#[tokio::test]
async fn identical_iterations_converge_after_threshold() {
    let tasks = TaskSet::builder()
        .register_all([fixed("security", vec![]), fixed("perf", vec![])])
        .unwrap()
        .build()
        .unwrap();
    let config = DelegationConfig {
        max_iterations: 10,
        convergence_threshold: 3,
        ..DelegationConfig::default()
    };

    let outcome = run_until_converged(&orchestrator(5_000), &tasks, &input(), &config)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Converged);
    assert_eq!(outcome.iterations.len(), 4);
    assert_eq!(outcome.signatures.len(), 1);
    assert_eq!(outcome.last().unwrap().decision(), MergeDecision::Approve);
}

#[tokio::test]
async fn changing_evidence_runs_to_iteration_limit() {
    let tasks = TaskSet::builder()
        .register(Arc::new(ChangingTask {
            calls: AtomicUsize::new(0),
        }))
        .unwrap()
        .build()
        .unwrap();
    let config = DelegationConfig {
        max_iterations: 3,
        ..DelegationConfig::default()
    };

    let outcome = run_until_converged(&orchestrator(5_000), &tasks, &input(), &config)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
    assert_eq!(outcome.iterations.len(), 3);
    assert_eq!(outcome.signatures.len(), 3);
}

#[tokio::test]
async fn next_input_sees_each_finished_iteration() {
    let tasks = TaskSet::builder()
        .register(fixed("security", vec![]))
        .unwrap()
        .build()
        .unwrap();
    let config = DelegationConfig {
        max_iterations: 3,
        convergence_threshold: 10,
        ..DelegationConfig::default()
    };

    let mut calls = Vec::new();
    let outcome = run_until_converged_with(
        &orchestrator(5_000),
        &tasks,
        input(),
        &config,
        |iteration, result, previous| {
            calls.push((iteration, result.outcomes.len()));
            let mut next = previous.clone();
            next.changed_files.push(format!("generated_{iteration}.rs"));
            next
        },
    )
    .await
    .unwrap();

    assert_eq!(calls, vec![(1, 1), (2, 1)]);
    let summaries: Vec<&str> = outcome
        .iterations
        .iter()
        .map(|r| r.outcomes[0].report().summary.as_str())
        .collect();
    assert_eq!(
        summaries,
        vec!["reviewed 2 files", "reviewed 3 files", "reviewed 4 files"]
    );
}

#[tokio::test]
async fn zero_iteration_budget_is_rejected() {
    let tasks = TaskSet::builder()
        .register(fixed("security", vec![]))
        .unwrap()
        .build()
        .unwrap();
    let config = DelegationConfig {
        max_iterations: 0,
        ..DelegationConfig::default()
    };

    let err = run_until_converged(&orchestrator(5_000), &tasks, &input(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}
