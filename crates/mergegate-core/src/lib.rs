//! mergegate core library
//!
//! Runs a fixed set of independent review subagents against one input with
//! bounded concurrency, isolates their timeouts and failures, merges their
//! findings into a single merge decision, and broadcasts progress over a
//! replaying event bus. A signature tracker lets iterative delegation loops
//! detect when repeated runs stop producing new information.

pub mod config;
pub mod delegation;
pub mod domain;
pub mod fanout;
pub mod merge;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod signature;
pub mod stream;
pub mod telemetry;

pub use config::OrchestratorConfig;
pub use delegation::{
    run_until_converged, run_until_converged_with, DelegationConfig, DelegationOutcome,
    StopReason,
};
pub use domain::{
    AggregateResult, CheckRecord, Confidence, Finding, MergeDecision, MergeGate,
    OrchestratorError, OrchestratorResult, ReviewInput, Scope, Severity, SkipRecord, TaskContext,
    TaskOutcome, TaskReport, ToolPlan,
};
pub use fanout::{
    run_all, run_all_with_sink, ContextBuilder, FanOutConfig, PassthroughContextBuilder,
    ReviewTask,
};
pub use merge::{aggregate, compute_merge_decision, dedupe_findings, generate_tool_plan};
pub use metrics::METRICS;
pub use orchestrator::{Orchestrator, TaskSet, TaskSetBuilder};
pub use signature::{EvidenceRecord, EvidenceSource, SignatureTracker};
pub use stream::{
    calculate_progress, calculate_progress_with_elapsed, EventBus, EventSink, ProgressSnapshot,
    StreamEvent, StreamEventKind, StreamHandle, Subscription,
};
pub use telemetry::{init_tracing, init_tracing_from_env, LogFormat};

/// mergegate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
