//! Bounded parallel fan-out of review tasks.
//!
//! Every task runs in its own tokio task; a shared semaphore caps how many
//! are in flight. Each task gets one timeout budget covering both context
//! construction and `run`. A task that times out, errors, or panics is turned
//! into a synthetic [`TaskOutcome`] so its siblings and the batch are
//! unaffected. Outcomes come back in input order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{error, instrument, warn};

use crate::config::{OrchestratorConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_TASK_TIMEOUT_MS};
use crate::domain::error::{OrchestratorError, OrchestratorResult};
use crate::domain::input::{ReviewInput, TaskContext};
use crate::domain::report::{duration_millis, TaskOutcome, TaskReport};
use crate::metrics::METRICS;
use crate::obs::emit_task_finished;
use crate::stream::{calculate_progress, EventBus, EventSink};

/// One independent review subagent.
#[async_trait]
pub trait ReviewTask: Send + Sync {
    /// Unique name within a task set; used as the report's agent name.
    fn name(&self) -> &str;

    /// Review the change described by `context`. An `Err` becomes a failed
    /// outcome; it never aborts the batch.
    async fn run(&self, context: TaskContext) -> anyhow::Result<TaskReport>;
}

/// Builds a task's context from the caller's raw input. May be slow; its
/// latency counts against the task's timeout.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build(&self, task_name: &str, input: &ReviewInput) -> anyhow::Result<TaskContext>;
}

/// Hands every task the raw input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughContextBuilder;

#[async_trait]
impl ContextBuilder for PassthroughContextBuilder {
    async fn build(&self, task_name: &str, input: &ReviewInput) -> anyhow::Result<TaskContext> {
        Ok(TaskContext::from_input(task_name, input))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutConfig {
    pub max_concurrency: usize,
    pub task_timeout: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS),
        }
    }
}

impl From<&OrchestratorConfig> for FanOutConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            task_timeout: config.task_timeout(),
        }
    }
}

impl FanOutConfig {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "task timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run every task and wait for all of them to settle.
///
/// Emits `started`, then `completed` or `error`, then `progress` for each
/// task when `sink` is set. Returns exactly one outcome per task, in input
/// order. Fails only on an empty task list or an invalid `config`.
pub async fn run_all(
    tasks: &[Arc<dyn ReviewTask>],
    input: Arc<ReviewInput>,
    context_builder: Arc<dyn ContextBuilder>,
    config: &FanOutConfig,
    sink: Option<&EventBus>,
) -> OrchestratorResult<Vec<TaskOutcome>> {
    let sink = sink.cloned().map(EventSink::new).unwrap_or_default();
    run_all_with_sink(tasks, input, context_builder, config, sink).await
}

/// [`run_all`] publishing lifecycle events to an arbitrary [`EventSink`].
///
/// The sink is dropped before returning, so a tap channel attached to it
/// closes once the last task has settled.
#[instrument(
    skip_all,
    fields(task_count = tasks.len(), max_concurrency = config.max_concurrency)
)]
pub async fn run_all_with_sink(
    tasks: &[Arc<dyn ReviewTask>],
    input: Arc<ReviewInput>,
    context_builder: Arc<dyn ContextBuilder>,
    config: &FanOutConfig,
    sink: EventSink,
) -> OrchestratorResult<Vec<TaskOutcome>> {
    if tasks.is_empty() {
        return Err(OrchestratorError::EmptyTaskList);
    }
    config.validate()?;

    let total = tasks.len();
    let sem = Arc::new(Semaphore::new(config.max_concurrency));
    let settled = Arc::new(AtomicUsize::new(0));
    let started_at = Instant::now();
    let timeout = config.task_timeout;
    let timeout_ms = duration_millis(timeout);

    let mut handles = Vec::with_capacity(total);

    for task in tasks {
        let task = Arc::clone(task);
        let input = Arc::clone(&input);
        let builder = Arc::clone(&context_builder);
        let sink = sink.clone();
        let sem = Arc::clone(&sem);
        let settled = Arc::clone(&settled);

        let handle = tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let name = task.name().to_string();
            sink.started(&name);

            let begun = Instant::now();
            let work = async {
                let context = builder.build(&name, &input).await?;
                task.run(context).await
            };

            let outcome = match tokio::time::timeout(timeout, work).await {
                Ok(Ok(report)) => {
                    METRICS.inc_tasks_completed();
                    sink.result(&name, &report);
                    TaskOutcome::Completed(report)
                }
                Ok(Err(e)) => {
                    let message = format!("{e:#}");
                    warn!(agent = %name, error = %message, "task failed");
                    METRICS.inc_tasks_failed();
                    sink.error(&name, message.clone());
                    TaskOutcome::failed(&name, message)
                }
                Err(_) => {
                    warn!(agent = %name, timeout_ms, "task timed out");
                    METRICS.inc_tasks_timed_out();
                    sink.error(&name, format!("timed out after {timeout_ms}ms"));
                    TaskOutcome::timed_out(&name, timeout)
                }
            };

            emit_task_finished(&name, outcome.status_str(), duration_millis(begun.elapsed()));
            let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
            if sink.is_enabled() {
                let progress = calculate_progress(done, total, started_at);
                sink.progress(&name, progress.to_payload());
            }
            outcome
        });

        handles.push(handle);
    }

    let mut outcomes = Vec::with_capacity(total);
    for (task, handle) in tasks.iter().zip(handles) {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => {
                let name = task.name();
                let message = format!("task panicked: {join_err}");
                error!(agent = %name, error = %message, "task aborted");
                METRICS.inc_tasks_failed();
                emit_task_finished(name, "failed", 0);
                let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
                sink.error(name, message.clone());
                if sink.is_enabled() {
                    let progress = calculate_progress(done, total, started_at);
                    sink.progress(name, progress.to_payload());
                }
                outcomes.push(TaskOutcome::failed(name, message));
            }
        }
    }

    Ok(outcomes)
}
