//! Orchestration layer: scheduling, fault isolation, and swarms.
//!
//! The [`Orchestrator`] dispatches plan tasks to agents from its
//! [`AgentRegistry`], gating each agent through a [`CircuitBreaker`].
//! The [`SwarmCoordinator`] runs independently and manages agent groups
//! that vote and receive tasks by allocation strategy.

pub mod breaker;
pub mod executor;
pub mod registry;
pub mod scheduler;
pub mod swarm;

pub use breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use executor::{FnExecutor, Logged, TaskExecutor};
pub use registry::{AgentHandle, AgentRegistry};
pub use scheduler::{ExecutionResult, Orchestrator, OrchestratorStatus, ProgressFn, SchedulerEvent};
pub use swarm::{
    AllocationStrategy, ConsensusType, OpenProposal, ProposalOutcome, SwarmConfig,
    SwarmCoordinator, SwarmEvent, SwarmMember, SwarmStatus, Vote,
};
