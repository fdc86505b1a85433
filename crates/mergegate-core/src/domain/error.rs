//! Error taxonomy for the orchestration core.
//!
//! Only contract violations surface here. Task timeouts and task errors are
//! converted into [`TaskOutcome`](crate::domain::TaskOutcome) data instead.

/// Errors produced by configuration and orchestrator setup.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("task list must not be empty")]
    EmptyTaskList,

    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type for orchestration operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
