//! Task data model.
//!
//! Tasks are the atomic units of work assigned to agents. Each task tracks
//! its required capabilities, status, assignment, timing, and payloads.

use crate::agent::{AgentId, Capabilities};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a task within a plan.
///
/// Plans reference tasks by id in their dependency map, and those
/// references may come from an external planner, so ids are free-form
/// strings. `new()` generates a `task-xxxxxxxx` id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(format!("task-{}", &Uuid::new_v4().simple().to_string()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task status in its lifecycle.
///
/// Status only moves forward: Pending, then Running, then one of the
/// terminal states. See [`Task::advance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created, not yet dispatched.
    Pending,
    /// Task is currently being executed by an agent.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was cancelled while running.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Cancelled => 2,
        }
    }

    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task priority levels, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A single unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// What the task should accomplish.
    pub goal: String,
    #[serde(default)]
    pub description: String,
    /// Capabilities an agent must declare to take this task.
    #[serde(default)]
    pub required_capabilities: Capabilities,
    #[serde(default)]
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Agent that produced the final outcome.
    pub assigned_to: Option<AgentId>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    /// Create a new pending task with the given name and goal.
    pub fn new(name: &str, goal: &str) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            goal: goal.to_string(),
            description: String::new(),
            required_capabilities: Capabilities::new(),
            priority: TaskPriority::Normal,
            deadline: None,
            status: TaskStatus::Pending,
            assigned_to: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            input: Value::Null,
            output: Value::Null,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = crate::agent::capabilities(caps);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Move to `next` if that is a forward transition.
    ///
    /// Returns false and leaves the task untouched otherwise, so a terminal
    /// task can never be revived or overwritten.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        match next.rank() {
            1 => self.started_at = Some(Utc::now()),
            2 => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        self.status = next;
        true
    }

    /// Transition to Running.
    pub fn start(&mut self) -> bool {
        self.advance(TaskStatus::Running)
    }

    /// Mark the task completed with its output.
    pub fn complete(&mut self, output: Value) -> bool {
        let advanced = self.advance(TaskStatus::Completed);
        if advanced {
            self.output = output;
        }
        advanced
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) -> bool {
        self.advance(TaskStatus::Failed {
            error: error.to_string(),
        })
    }

    /// Mark the task cancelled.
    pub fn cancel(&mut self) -> bool {
        self.advance(TaskStatus::Cancelled)
    }

    /// Record the agent responsible for this task.
    pub fn assign_agent(&mut self, agent_id: AgentId) {
        self.assigned_to = Some(agent_id);
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the deadline, if any, has passed.
    pub fn is_overdue(&self) -> bool {
        self.deadline.map(|d| Utc::now() > d).unwrap_or(false)
    }
}
