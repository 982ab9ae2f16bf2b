//! Core domain models for orchestration.
//!
//! Tasks, the plans that group them, and the context that travels with
//! every agent call.

pub mod context;
pub mod plan;
pub mod task;

pub use context::ExecutionContext;
pub use plan::TaskPlan;
pub use task::{Task, TaskId, TaskPriority, TaskStatus};
