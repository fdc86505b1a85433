//! Orchestrator configuration.
//!
//! Values come from built-in defaults, optionally a TOML file, then
//! `MERGEGATE_*` environment variables. [`OrchestratorConfig::validate`]
//! rejects settings the scheduler and event bus cannot honour.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{OrchestratorError, OrchestratorResult};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_CONVERGENCE_THRESHOLD: u32 = 3;

const ENV_MAX_CONCURRENCY: &str = "MERGEGATE_MAX_CONCURRENCY";
const ENV_TASK_TIMEOUT_MS: &str = "MERGEGATE_TASK_TIMEOUT_MS";
const ENV_STREAM_BUFFER_SIZE: &str = "MERGEGATE_STREAM_BUFFER_SIZE";
const ENV_CONVERGENCE_THRESHOLD: &str = "MERGEGATE_CONVERGENCE_THRESHOLD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks in flight at once.
    pub max_concurrency: usize,
    /// Budget for context construction plus `run`, per task.
    pub task_timeout_ms: u64,
    /// Replay buffer capacity of the event bus.
    pub stream_buffer_size: usize,
    /// Identical iterations required before a delegation loop is converged.
    pub convergence_threshold: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
        }
    }
}

impl OrchestratorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn from_toml_str(raw: &str) -> OrchestratorResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| OrchestratorError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        let config = config.with_env_overrides()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded orchestrator config");
        Ok(config)
    }

    /// Apply `MERGEGATE_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> OrchestratorResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> OrchestratorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = parse_env(ENV_MAX_CONCURRENCY, &v)?;
        }
        if let Some(v) = lookup(ENV_TASK_TIMEOUT_MS) {
            self.task_timeout_ms = parse_env(ENV_TASK_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_STREAM_BUFFER_SIZE) {
            self.stream_buffer_size = parse_env(ENV_STREAM_BUFFER_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_CONVERGENCE_THRESHOLD) {
            self.convergence_threshold = parse_env(ENV_CONVERGENCE_THRESHOLD, &v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.task_timeout_ms == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "task_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.stream_buffer_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "stream_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> OrchestratorResult<T> {
    value.trim().parse().map_err(|_| {
        OrchestratorError::InvalidConfig(format!("{key} has non-numeric value '{value}'"))
    })
}
