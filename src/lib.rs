//! Dependency-aware task orchestration across a pool of agents.
//!
//! The crate has three cooperating parts:
//!
//! - [`orchestration::Orchestrator`] walks a [`core::TaskPlan`] round by round,
//!   dispatching ready tasks to capable agents under a global concurrency cap.
//! - [`orchestration::CircuitBreaker`] isolates failing agents so the
//!   scheduler stops sending them work until they recover.
//! - [`orchestration::SwarmCoordinator`] manages a bounded, dynamic group of
//!   agents that vote on proposals and receive tasks by allocation strategy.
//!
//! Agents are opaque: anything implementing [`orchestration::TaskExecutor`].

pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;

pub use agent::{AgentId, Capabilities};
pub use config::Config;
pub use error::{Error, Result, TaskError};
