//! Caller input and the per-task context derived from it.

use serde::{Deserialize, Serialize};

/// Raw review input shared by every task in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub diff: String,
    /// Free-form task metadata (ticket ids, base branch, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ReviewInput {
    pub fn new(changed_files: Vec<String>, diff: impl Into<String>) -> Self {
        Self {
            changed_files,
            diff: diff.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Context handed to a single task's `run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub agent: String,
    pub changed_files: Vec<String>,
    pub diff: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TaskContext {
    pub fn from_input(agent: &str, input: &ReviewInput) -> Self {
        Self {
            agent: agent.to_string(),
            changed_files: input.changed_files.clone(),
            diff: input.diff.clone(),
            metadata: input.metadata.clone(),
        }
    }
}
