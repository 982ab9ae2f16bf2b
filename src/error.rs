use crate::agent::AgentId;
use crate::core::task::TaskId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single task did not produce a successful result.
///
/// These never escape `Orchestrator::execute`; they are recorded on the
/// task's `ExecutionResult` so callers can inspect partial success.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskError {
    #[error("No agent available for capabilities: {capabilities:?}")]
    NoAgentAvailable { capabilities: Vec<String> },

    #[error("All {attempts} candidate agents failed{}", last_suffix(.last))]
    AllAgentsFailed {
        attempts: usize,
        /// Message of the last attempt that errored, if any attempt ran.
        last: Option<String>,
    },

    #[error("Dependency deadlock: unresolved dependencies {unresolved:?}")]
    DependencyDeadlock { unresolved: Vec<TaskId> },

    #[error("Agent {agent_id} timed out after {timeout:?}")]
    AgentExecutionTimeout { agent_id: AgentId, timeout: Duration },

    #[error("Agent {agent_id} failed: {message}")]
    AgentExecutionError { agent_id: AgentId, message: String },
}

fn last_suffix(last: &Option<String>) -> String {
    last.as_ref()
        .map(|e| format!(" (last: {})", e))
        .unwrap_or_default()
}

impl TaskError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::NoAgentAvailable { .. } => "no_agent_available",
            TaskError::AllAgentsFailed { .. } => "all_agents_failed",
            TaskError::DependencyDeadlock { .. } => "dependency_deadlock",
            TaskError::AgentExecutionTimeout { .. } => "agent_execution_timeout",
            TaskError::AgentExecutionError { .. } => "agent_execution_error",
        }
    }
}
