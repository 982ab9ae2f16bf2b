//! Per-agent circuit breaker.
//!
//! The breaker is a plain state machine with no logging or I/O; callers
//! that want to observe transitions compare [`CircuitBreaker::state`]
//! before and after recording an outcome.
//!
//! ```text
//!            failures >= failure_threshold
//!   Closed ─────────────────────────────────▶ Open
//!     ▲                                        │ recovery_timeout elapsed
//!     │ successes >= success_threshold         ▼ (on the next can_execute)
//!     └──────────────────────────────────── HalfOpen ──any failure──▶ Open
//! ```
//!
//! Time is read from `tokio::time::Instant`, so tests can drive recovery
//! with a paused clock.

use crate::config::BreakerConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Too many failures; calls are rejected until the recovery timeout.
    Open,
    /// Probing: a limited number of calls are let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time since the last recorded failure.
    pub since_last_failure: Option<Duration>,
    pub half_open_calls: u32,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    recovery_timeout: Duration,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    half_open_calls: u32,
}

impl CircuitBreaker {
    /// Build a closed breaker. Fails with `Error::Validation` for zero
    /// thresholds or a recovery timeout that is not a positive duration.
    pub fn new(config: BreakerConfig) -> Result<Self> {
        config.validate()?;
        let recovery_timeout = config.recovery_timeout()?;
        Ok(Self {
            config,
            recovery_timeout,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            half_open_calls: 0,
        })
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. Does not perform the Open -> HalfOpen transition;
    /// only [`can_execute`](Self::can_execute) does.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Decide whether a call may be attempted now.
    ///
    /// In Open, the call that observes the recovery timeout has elapsed
    /// moves the breaker to HalfOpen and is itself allowed. In HalfOpen,
    /// every permitted call consumes one of `half_open_max_calls` slots.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(false);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 0;
                }
                recovered
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < self.config.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.half_open_calls = 0;
                }
            }
            CircuitState::Closed => {
                // Consecutive-failure semantics: any success clears the streak.
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_at = Some(Instant::now());

        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.half_open_calls = 0;
                self.success_count = 0;
            }
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to Closed with cleared counters.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_calls = 0;
        self.last_failure_at = None;
    }

    pub fn metrics(&self) -> BreakerMetrics {
        BreakerMetrics {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            since_last_failure: self.last_failure_at.map(|at| at.elapsed()),
            half_open_calls: self.half_open_calls,
        }
    }
}
