//! Registry of agents available to the orchestrator.
//!
//! The `AgentRegistry` maps each agent id to its declared capabilities,
//! health flag and circuit breaker. Iteration follows registration order,
//! which is also the order candidates are tried in.

use crate::agent::{satisfies, AgentId, Capabilities};
use crate::config::BreakerConfig;
use crate::error::Result;
use crate::orchestration::breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
use crate::orchestration::executor::TaskExecutor;
use crate::{tlog, tlog_debug, tlog_trace, tlog_warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A registered agent.
///
/// Handles are shared (`Arc`) with in-flight dispatches, so an agent that
/// is unregistered mid-call finishes that call against its own breaker.
pub struct AgentHandle {
    /// Unique identifier for this agent.
    pub id: AgentId,
    /// Declared capability tags.
    pub capabilities: Capabilities,
    healthy: AtomicBool,
    breaker: Mutex<CircuitBreaker>,
    breaker_enabled: bool,
    executor: Arc<dyn TaskExecutor>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("healthy", &self.is_healthy())
            .field("breaker", &self.breaker_state())
            .finish()
    }
}

impl AgentHandle {
    fn new(
        executor: Arc<dyn TaskExecutor>,
        capabilities: Capabilities,
        breaker: CircuitBreaker,
        breaker_enabled: bool,
    ) -> Self {
        Self {
            id: executor.id(),
            capabilities,
            healthy: AtomicBool::new(true),
            breaker: Mutex::new(breaker),
            breaker_enabled,
            executor,
        }
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        // Breaker updates never panic midway, so a poisoned lock still
        // holds consistent state.
        self.breaker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the breaker for permission to call this agent.
    ///
    /// Always true when breakers are disabled.
    pub fn can_execute(&self) -> bool {
        if !self.breaker_enabled {
            return true;
        }
        let mut breaker = self.breaker();
        let before = breaker.state();
        let allowed = breaker.can_execute();
        let after = breaker.state();
        drop(breaker);

        if before != after {
            tlog!("circuit for agent {} moved {} -> {}", self.id, before, after);
        }
        allowed
    }

    pub fn record_success(&self) {
        if !self.breaker_enabled {
            return;
        }
        let mut breaker = self.breaker();
        let before = breaker.state();
        breaker.record_success();
        let after = breaker.state();
        drop(breaker);

        if before != after {
            tlog!("circuit for agent {} moved {} -> {}", self.id, before, after);
        }
    }

    pub fn record_failure(&self) {
        if !self.breaker_enabled {
            return;
        }
        let mut breaker = self.breaker();
        let before = breaker.state();
        breaker.record_failure();
        let after = breaker.state();
        let failures = breaker.metrics().failure_count;
        drop(breaker);

        if before != after {
            tlog_warn!(
                "circuit for agent {} opened ({} -> {}) after {} failure(s)",
                self.id,
                before,
                after,
                failures
            );
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker().state()
    }

    pub fn breaker_metrics(&self) -> BreakerMetrics {
        self.breaker().metrics()
    }

    /// Manually close the breaker.
    pub fn reset_breaker(&self) {
        self.breaker().reset();
        tlog_debug!("circuit for agent {} reset", self.id);
    }
}

/// Agents known to one orchestrator.
///
/// # Example
///
/// ```ignore
/// let mut registry = AgentRegistry::new(BreakerConfig::default(), true)?;
/// registry.register(Arc::new(agent), capabilities(["search"]));
/// let ids = registry.find_candidates(&capabilities(["search"]));
/// ```
pub struct AgentRegistry {
    /// Registration order.
    order: Vec<AgentId>,
    agents: HashMap<AgentId, Arc<AgentHandle>>,
    /// Closed breaker cloned for each new agent.
    fresh_breaker: CircuitBreaker,
    breaker_enabled: bool,
}

impl AgentRegistry {
    /// Fails if `breaker_config` is invalid, even when breakers are disabled.
    pub fn new(breaker_config: BreakerConfig, breaker_enabled: bool) -> Result<Self> {
        Ok(Self {
            order: Vec::new(),
            agents: HashMap::new(),
            fresh_breaker: CircuitBreaker::new(breaker_config)?,
            breaker_enabled,
        })
    }

    /// Add an agent with a fresh breaker and health set to true.
    ///
    /// Re-registering an existing id replaces its handle and breaker but
    /// keeps its position in the candidate order.
    pub fn register(
        &mut self,
        executor: Arc<dyn TaskExecutor>,
        capabilities: Capabilities,
    ) -> AgentId {
        let handle = AgentHandle::new(
            executor,
            capabilities,
            self.fresh_breaker.clone(),
            self.breaker_enabled,
        );
        let id = handle.id.clone();
        tlog!(
            "agent {} registered with capabilities {:?}",
            id,
            handle.capabilities
        );

        if self.agents.insert(id.clone(), Arc::new(handle)).is_none() {
            self.order.push(id.clone());
        }
        id
    }

    /// Remove an agent and its breaker. Returns false if it was unknown.
    pub fn unregister(&mut self, id: &AgentId) -> bool {
        if self.agents.remove(id).is_none() {
            return false;
        }
        self.order.retain(|a| a != id);
        tlog!("agent {} unregistered", id);
        true
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<AgentHandle>> {
        self.agents.get(id).cloned()
    }

    /// Handles in registration order.
    pub fn handles(&self) -> impl Iterator<Item = &Arc<AgentHandle>> {
        self.order.iter().filter_map(|id| self.agents.get(id))
    }

    /// Agents that could take a task needing `required` right now.
    ///
    /// An agent qualifies if it declares every required capability, is
    /// healthy, and its breaker permits a call. Consulting the breaker may
    /// move it from Open to HalfOpen and uses up a HalfOpen probe slot.
    pub fn find_candidates(&self, required: &Capabilities) -> Vec<AgentId> {
        self.handles()
            .filter(|h| {
                let eligible =
                    satisfies(&h.capabilities, required) && h.is_healthy() && h.can_execute();
                tlog_trace!("candidate check agent={} eligible={}", h.id, eligible);
                eligible
            })
            .map(|h| h.id.clone())
            .collect()
    }

    /// Set an agent's health flag. Returns false if the agent is unknown.
    pub fn set_health(&self, id: &AgentId, healthy: bool) -> bool {
        match self.agents.get(id) {
            Some(handle) => {
                handle.set_healthy(healthy);
                tlog_debug!("agent {} health set to {}", id, healthy);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.agents.values().filter(|h| h.is_healthy()).count()
    }

    /// Current breaker state per agent. Empty when breakers are disabled.
    pub fn breaker_states(&self) -> BTreeMap<AgentId, CircuitState> {
        if !self.breaker_enabled {
            return BTreeMap::new();
        }
        self.agents
            .iter()
            .map(|(id, h)| (id.clone(), h.breaker_state()))
            .collect()
    }

    pub fn breaker_metrics(&self) -> BTreeMap<AgentId, BreakerMetrics> {
        if !self.breaker_enabled {
            return BTreeMap::new();
        }
        self.agents
            .iter()
            .map(|(id, h)| (id.clone(), h.breaker_metrics()))
            .collect()
    }
}
