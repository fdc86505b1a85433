//! Top-level façade: fan out a task set, stream progress, merge the results.
//!
//! Callers register their review tasks in a [`TaskSet`] (no global registry)
//! and hand it to [`Orchestrator::run`] together with the raw input.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, instrument, Instrument};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::domain::aggregate::AggregateResult;
use crate::domain::error::{OrchestratorError, OrchestratorResult};
use crate::domain::input::ReviewInput;
use crate::domain::report::TaskOutcome;
use crate::fanout::{
    run_all_with_sink, ContextBuilder, FanOutConfig, PassthroughContextBuilder, ReviewTask,
};
use crate::merge::aggregate;
use crate::metrics::METRICS;
use crate::obs::{emit_review_decided, emit_review_started, RunSpan};
use crate::stream::{EventBus, EventSink, StreamEvent, StreamHandle};

/// A non-empty set of uniquely named review tasks.
#[derive(Clone)]
pub struct TaskSet {
    tasks: Vec<Arc<dyn ReviewTask>>,
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("tasks", &self.names())
            .finish()
    }
}

impl TaskSet {
    pub fn builder() -> TaskSetBuilder {
        TaskSetBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn as_slice(&self) -> &[Arc<dyn ReviewTask>] {
        &self.tasks
    }
}

#[derive(Default)]
pub struct TaskSetBuilder {
    tasks: Vec<Arc<dyn ReviewTask>>,
    names: HashSet<String>,
}

impl std::fmt::Debug for TaskSetBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSetBuilder")
            .field("names", &self.names)
            .finish()
    }
}

impl TaskSetBuilder {
    /// Add a task. Rejects a name that is already registered.
    pub fn register(mut self, task: Arc<dyn ReviewTask>) -> OrchestratorResult<Self> {
        let name = task.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(OrchestratorError::DuplicateTask(name));
        }
        self.tasks.push(task);
        Ok(self)
    }

    pub fn register_all<I>(self, tasks: I) -> OrchestratorResult<Self>
    where
        I: IntoIterator<Item = Arc<dyn ReviewTask>>,
    {
        tasks.into_iter().try_fold(self, |builder, task| builder.register(task))
    }

    pub fn build(self) -> OrchestratorResult<TaskSet> {
        if self.tasks.is_empty() {
            return Err(OrchestratorError::EmptyTaskList);
        }
        Ok(TaskSet { tasks: self.tasks })
    }
}

/// Runs task sets and reduces them to an [`AggregateResult`].
///
/// All runs publish to the orchestrator's shared [`EventBus`]. A bus session
/// opens when a run starts while no other run is active and closes when the
/// last overlapping run returns, so concurrent runs never clear each other's
/// replay buffer. Progress callbacks are fed from a per-run channel and only
/// see their own run's events.
pub struct Orchestrator {
    config: OrchestratorConfig,
    context_builder: Arc<dyn ContextBuilder>,
    bus: EventBus,
    sessions: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    active_runs: usize,
    handle: Option<StreamHandle>,
}

/// Holds the shared bus session open for one run.
struct SessionLease<'a> {
    sessions: &'a Mutex<SessionState>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        let handle = {
            let mut state = lock_sessions(self.sessions);
            state.active_runs = state.active_runs.saturating_sub(1);
            if state.active_runs == 0 {
                state.handle.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.close();
        }
    }
}

fn lock_sessions(sessions: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> OrchestratorResult<Self> {
        config.validate()?;
        let bus = EventBus::new(config.stream_buffer_size);
        Ok(Self {
            config,
            context_builder: Arc::new(PassthroughContextBuilder),
            bus,
            sessions: Mutex::new(SessionState::default()),
        })
    }

    pub fn with_context_builder(mut self, builder: Arc<dyn ContextBuilder>) -> Self {
        self.context_builder = builder;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Bus carrying `started` / `progress` / `completed` / `error` events.
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    #[instrument(skip_all, fields(task_count = tasks.len()))]
    pub async fn run(
        &self,
        tasks: &TaskSet,
        input: ReviewInput,
    ) -> OrchestratorResult<AggregateResult> {
        let _lease = self.lease_session();
        self.execute(tasks, input, EventSink::new(self.bus.clone()))
            .await
    }

    /// Like [`run`](Self::run), additionally calling `on_event` for every
    /// stream event of this run, and only this run. Every event is delivered
    /// before returning, however small the bus replay buffer is.
    #[instrument(skip_all, fields(task_count = tasks.len()))]
    pub async fn run_with_progress<F>(
        &self,
        tasks: &TaskSet,
        input: ReviewInput,
        mut on_event: F,
    ) -> OrchestratorResult<AggregateResult>
    where
        F: FnMut(&StreamEvent) + Send,
    {
        let _lease = self.lease_session();
        let (tap, mut events) = mpsc::unbounded_channel();
        let sink = EventSink::new(self.bus.clone()).with_tap(tap);

        // `execute` drops the sink when the fan-out settles, which ends `events`.
        let forward = async {
            while let Some(event) = events.recv().await {
                on_event(&event);
            }
        };
        let (result, ()) = tokio::join!(self.execute(tasks, input, sink), forward);
        result
    }

    fn lease_session(&self) -> SessionLease<'_> {
        let mut state = lock_sessions(&self.sessions);
        if state.active_runs == 0 {
            state.handle = Some(self.bus.start_stream());
        }
        state.active_runs += 1;
        debug!(active_runs = state.active_runs, "run joined event stream session");
        SessionLease {
            sessions: &self.sessions,
        }
    }

    async fn execute(
        &self,
        tasks: &TaskSet,
        input: ReviewInput,
        sink: EventSink,
    ) -> OrchestratorResult<AggregateResult> {
        let run_id = Uuid::new_v4().to_string();
        let fan_out = FanOutConfig::from(&self.config);
        emit_review_started(&run_id, tasks.len(), fan_out.max_concurrency);

        let span = tracing::info_span!("mergegate.fanout", run_id = %run_id);
        let outcomes = run_all_with_sink(
            tasks.as_slice(),
            Arc::new(input),
            Arc::clone(&self.context_builder),
            &fan_out,
            sink,
        )
        .instrument(span)
        .await?;

        Ok(decide(&run_id, outcomes))
    }
}

fn decide(run_id: &str, outcomes: Vec<TaskOutcome>) -> AggregateResult {
    let _span = RunSpan::enter(run_id);
    let result = aggregate(run_id, outcomes);
    METRICS.inc_runs_merged();
    emit_review_decided(
        run_id,
        result.decision().as_str(),
        result.findings.len(),
        result.synthetic_count(),
    );
    result
}
