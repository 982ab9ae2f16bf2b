//! Integration test suite for taskmesh.
//!
//! These tests drive the public API end to end: plans through the
//! orchestrator, agent failures through the circuit breakers, and swarm
//! membership, voting, and allocation.
//!
//! # Test Categories
//!
//! - `scheduling`: Round structure, dependencies, deadlocks, concurrency
//! - `fallback`: Candidate fallback, timeouts, breaker gating, cancellation
//! - `swarm`: Membership, consensus, task allocation
//!
//! Time-dependent tests run on a paused tokio clock, so none of them
//! actually sleep.

mod fixtures;

mod fallback;
