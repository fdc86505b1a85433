//! Convergence-driven re-running of a task set.
//!
//! Iterative delegation re-invokes the same tasks until they stop producing
//! new evidence. Each iteration's reports go through a [`SignatureTracker`];
//! the loop stops once the tracker reports convergence or the iteration
//! budget runs out.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{OrchestratorConfig, DEFAULT_CONVERGENCE_THRESHOLD};
use crate::domain::aggregate::AggregateResult;
use crate::domain::error::{OrchestratorError, OrchestratorResult};
use crate::domain::input::ReviewInput;
use crate::domain::report::TaskReport;
use crate::metrics::METRICS;
use crate::obs::emit_loop_stagnated;
use crate::orchestrator::{Orchestrator, TaskSet};
use crate::signature::{SignatureTracker, DEFAULT_EVIDENCE_KEYS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationConfig {
    pub max_iterations: usize,
    pub convergence_threshold: u32,
    pub evidence_keys: Vec<String>,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            evidence_keys: DEFAULT_EVIDENCE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl DelegationConfig {
    pub fn from_config(config: &OrchestratorConfig, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            convergence_threshold: config.convergence_threshold,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct DelegationOutcome {
    pub iterations: Vec<AggregateResult>,
    pub stop_reason: StopReason,
    /// Distinct signatures seen, oldest first.
    pub signatures: Vec<String>,
}

impl DelegationOutcome {
    pub fn last(&self) -> Option<&AggregateResult> {
        self.iterations.last()
    }
}

/// Re-run `tasks` on the same input until their evidence stops changing.
pub async fn run_until_converged(
    orchestrator: &Orchestrator,
    tasks: &TaskSet,
    input: &ReviewInput,
    config: &DelegationConfig,
) -> OrchestratorResult<DelegationOutcome> {
    run_until_converged_with(orchestrator, tasks, input.clone(), config, |_, _, previous| {
        previous.clone()
    })
    .await
}

/// Like [`run_until_converged`], deriving each next input from the previous
/// iteration's input and aggregate (e.g. feeding must-fix items back in).
pub async fn run_until_converged_with<F>(
    orchestrator: &Orchestrator,
    tasks: &TaskSet,
    initial_input: ReviewInput,
    config: &DelegationConfig,
    mut next_input: F,
) -> OrchestratorResult<DelegationOutcome>
where
    F: FnMut(usize, &AggregateResult, &ReviewInput) -> ReviewInput + Send,
{
    if config.max_iterations == 0 {
        return Err(OrchestratorError::InvalidConfig(
            "max_iterations must be greater than zero".to_string(),
        ));
    }

    let mut tracker = SignatureTracker::new(config.evidence_keys.iter().cloned());
    let mut iterations = Vec::new();
    let mut stop_reason = StopReason::MaxIterations;
    let mut input = initial_input;

    for iteration in 1..=config.max_iterations {
        let result = orchestrator.run(tasks, input.clone()).await?;
        let reports: Vec<TaskReport> = result
            .outcomes
            .iter()
            .map(|o| o.report().clone())
            .collect();

        if !tracker.check_novelty(&reports) {
            emit_loop_stagnated(iteration, tracker.stagnation_count());
        }

        if tracker.is_converged(config.convergence_threshold) {
            info!(iteration, "delegation loop converged");
            iterations.push(result);
            stop_reason = StopReason::Converged;
            break;
        }

        if iteration < config.max_iterations {
            input = next_input(iteration, &result, &input);
        }
        iterations.push(result);
    }
    METRICS.flush();

    Ok(DelegationOutcome {
        iterations,
        stop_reason,
        signatures: tracker.history().to_vec(),
    })
}
