//! Round-based scheduler for task plans.
//!
//! The `Orchestrator` walks a plan's dependency graph in rounds. Each round
//! takes every task whose prerequisites have all completed (up to the
//! concurrency cap), dispatches them concurrently, and waits for the whole
//! batch before computing the next ready set. A task that becomes ready
//! mid-round waits for the next round even if capacity is free.
//!
//! Per-task failures never abort the plan: they are recorded in that task's
//! [`ExecutionResult`]. Dependents of a failed task are never unlocked, so
//! they end the run failed with [`TaskError::DependencyDeadlock`].

use crate::agent::{AgentId, Capabilities};
use crate::config::{BreakerConfig, Config, OrchestratorConfig};
use crate::core::{ExecutionContext, Task, TaskId, TaskPlan, TaskStatus};
use crate::error::{Result, TaskError};
use crate::orchestration::breaker::CircuitState;
use crate::orchestration::executor::TaskExecutor;
use crate::orchestration::registry::AgentRegistry;
use crate::{tlog, tlog_debug, tlog_error, tlog_warn};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Progress callback invoked once per dispatched task, after its result
/// is recorded.
pub type ProgressFn = dyn Fn(&TaskId, &ExecutionResult) + Send + Sync;

/// Events emitted by the orchestrator while executing a plan.
///
/// These events allow external components to follow execution without
/// polling. Delivery is best effort: events are dropped while the channel
/// is full, so a slow receiver never stalls a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Execution of a plan began.
    PlanStarted { plan_id: String, tasks: usize },
    /// A new round of ready tasks is being dispatched.
    RoundStarted { round: usize, tasks: Vec<TaskId> },
    /// A task was handed to an agent (once per attempt).
    TaskStarted { task_id: TaskId, agent_id: AgentId },
    /// A task finished successfully.
    TaskCompleted { task_id: TaskId, agent_id: AgentId },
    /// A task finished unsuccessfully.
    TaskFailed { task_id: TaskId, error: TaskError },
    /// No task could make progress; these were failed.
    Deadlock { tasks: Vec<TaskId> },
    /// The plan reached a terminal state for every task.
    PlanFinished {
        plan_id: String,
        completed: usize,
        failed: usize,
    },
}

/// Outcome of one task within one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub success: bool,
    /// Output payload reported by the agent.
    pub output: Value,
    pub error: Option<TaskError>,
    /// Wall time from dispatch (including waiting for a slot) to outcome.
    pub duration: Duration,
    /// Candidate attempts that failed before this outcome.
    pub retry_count: usize,
    /// Agent that produced the outcome, if any call returned.
    pub agent_id: Option<AgentId>,
}

impl ExecutionResult {
    fn failure(task_id: TaskId, error: TaskError, duration: Duration, retry_count: usize) -> Self {
        Self {
            task_id,
            success: false,
            output: Value::Null,
            error: Some(error),
            duration,
            retry_count,
            agent_id: None,
        }
    }
}

/// Snapshot of orchestrator state for observability.
///
/// Not authoritative: scheduling decisions always re-read live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub registered_agents: usize,
    pub active_tasks: usize,
    pub healthy_agents: usize,
    pub breaker_states: BTreeMap<AgentId, CircuitState>,
}

/// A task currently inside an agent call.
struct ActiveTask {
    plan_id: String,
    task_id: TaskId,
    agent_id: AgentId,
    cancelled: bool,
    token: CancellationToken,
}

/// What one task dispatch produced.
struct Dispatch {
    result: ExecutionResult,
    /// Task as returned by the agent that answered.
    returned: Option<Task>,
    cancelled: bool,
}

/// Dependency-aware scheduler over a registry of agents.
///
/// # Example
///
/// ```ignore
/// use taskmesh::orchestration::{FnExecutor, Orchestrator};
/// use taskmesh::core::ExecutionContext;
///
/// let orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
/// orchestrator.register_agent(writer, ["text-generation"]).await;
/// orchestrator.register_agent(editor, ["summarization"]).await;
///
/// let mut plan = orchestrator.create_plan(
///     "Write a blog post about AI",
///     &["text-generation", "summarization"],
/// );
/// let results = orchestrator.execute(&mut plan, &ExecutionContext::new(), None).await?;
/// ```
pub struct Orchestrator {
    config: OrchestratorConfig,
    /// Per-call deadline resolved from `config`.
    timeout: Duration,
    registry: Arc<RwLock<AgentRegistry>>,
    /// Caps outstanding agent calls across every plan this instance runs.
    semaphore: Arc<Semaphore>,
    /// In-flight calls keyed by a per-call sequence number, so plans that
    /// share task ids never clobber each other's entries.
    active: Mutex<HashMap<u64, ActiveTask>>,
    next_call: AtomicU64,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Orchestrator {
    /// Create an orchestrator with default breaker thresholds.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        Self::with_breaker_config(config, BreakerConfig::default())
    }

    /// Fails with `Error::Validation` if either config is invalid.
    pub fn with_breaker_config(
        config: OrchestratorConfig,
        breaker: BreakerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let timeout = config.default_timeout()?;
        let registry = AgentRegistry::new(breaker, config.enable_circuit_breaker)?;
        Ok(Self {
            timeout,
            registry: Arc::new(RwLock::new(registry)),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            active: Mutex::new(HashMap::new()),
            next_call: AtomicU64::new(0),
            event_tx: None,
            config,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_breaker_config(config.orchestrator.clone(), config.breaker.clone())
    }

    /// Emit [`SchedulerEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared handle to the agent registry.
    pub fn registry(&self) -> Arc<RwLock<AgentRegistry>> {
        Arc::clone(&self.registry)
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(TrySendError::Full(event)) = tx.try_send(event) {
                tlog_debug!("event channel full, dropping {:?}", event);
            }
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ActiveTask>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========== Agent registry ==========

    /// Register an agent under its own id. Last registration wins.
    pub async fn register_agent<E, I, S>(&self, agent: E, capabilities: I) -> AgentId
    where
        E: TaskExecutor + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register_shared(Arc::new(agent), crate::agent::capabilities(capabilities))
            .await
    }

    /// Register an agent that is already shared elsewhere.
    pub async fn register_shared(
        &self,
        agent: Arc<dyn TaskExecutor>,
        capabilities: Capabilities,
    ) -> AgentId {
        self.registry.write().await.register(agent, capabilities)
    }

    pub async fn unregister_agent(&self, id: &AgentId) -> bool {
        self.registry.write().await.unregister(id)
    }

    pub async fn set_agent_health(&self, id: &AgentId, healthy: bool) -> bool {
        self.registry.read().await.set_health(id, healthy)
    }

    /// Agents that could take a task with these requirements, in
    /// registration order.
    pub async fn find_agents_for_task(&self, required: &Capabilities) -> Vec<AgentId> {
        self.registry.read().await.find_candidates(required)
    }

    // ========== Planning ==========

    /// Linear fallback plan: one task per capability, each depending on
    /// the previous one.
    pub fn create_plan<S: AsRef<str>>(&self, goal: &str, required_capabilities: &[S]) -> TaskPlan {
        TaskPlan::linear(goal, required_capabilities)
    }

    // ========== Execution ==========

    /// Run every task in `plan` and return one result per task.
    ///
    /// Task statuses in `plan` are updated as the run progresses. Returns
    /// `Err` only for a malformed plan (duplicate task ids); task-level
    /// failures are reported in the result map.
    pub async fn execute(
        &self,
        plan: &mut TaskPlan,
        ctx: &ExecutionContext,
        on_progress: Option<&ProgressFn>,
    ) -> Result<HashMap<TaskId, ExecutionResult>> {
        plan.ensure_unique_ids()?;

        let all: Vec<TaskId> = plan.task_ids();
        let mut results: HashMap<TaskId, ExecutionResult> = HashMap::new();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut failed: HashSet<TaskId> = HashSet::new();

        let mut pending_deps: HashMap<TaskId, HashSet<TaskId>> = all
            .iter()
            .map(|id| (id.clone(), plan.dependencies_of(id).iter().cloned().collect()))
            .collect();
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for (task_id, deps) in &plan.dependencies {
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(task_id.clone());
            }
        }

        tlog!("plan {} started with {} task(s)", plan.id, all.len());
        self.emit(SchedulerEvent::PlanStarted {
            plan_id: plan.id.clone(),
            tasks: all.len(),
        });

        let mut round = 0;
        while completed.len() + failed.len() < all.len() {
            let ready: Vec<TaskId> = all
                .iter()
                .filter(|id| !completed.contains(*id) && !failed.contains(*id))
                .filter(|id| pending_deps.get(*id).map(HashSet::is_empty).unwrap_or(true))
                .cloned()
                .collect();

            if ready.is_empty() {
                let remaining: Vec<TaskId> = all
                    .iter()
                    .filter(|id| !completed.contains(*id) && !failed.contains(*id))
                    .cloned()
                    .collect();
                tlog_error!("plan {} deadlocked; remaining: {:?}", plan.id, remaining);

                for id in &remaining {
                    let mut unresolved: Vec<TaskId> = pending_deps
                        .get(id)
                        .map(|deps| deps.iter().cloned().collect())
                        .unwrap_or_default();
                    unresolved.sort();
                    let error = TaskError::DependencyDeadlock { unresolved };
                    if let Some(task) = plan.task_mut(id) {
                        task.fail(&error.to_string());
                    }
                    results.insert(
                        id.clone(),
                        ExecutionResult::failure(id.clone(), error, Duration::ZERO, 0),
                    );
                    failed.insert(id.clone());
                }
                self.emit(SchedulerEvent::Deadlock { tasks: remaining });
                break;
            }

            round += 1;
            let batch: Vec<TaskId> = ready.into_iter().take(self.config.max_concurrent_tasks).collect();
            tlog_debug!("plan {} round {}: {:?}", plan.id, round, batch);
            self.emit(SchedulerEvent::RoundStarted {
                round,
                tasks: batch.clone(),
            });

            let plan_id = plan.id.clone();
            let mut dispatches = Vec::with_capacity(batch.len());
            for id in &batch {
                if let Some(task) = plan.task_mut(id) {
                    task.start();
                    dispatches.push(self.execute_task(&plan_id, task.clone(), ctx));
                }
            }
            // Round barrier: nothing new starts until the whole batch is done.
            let outcomes = join_all(dispatches).await;

            for outcome in outcomes {
                let Dispatch {
                    result,
                    returned,
                    cancelled,
                } = outcome;
                let id = result.task_id.clone();

                if let Some(task) = plan.task_mut(&id) {
                    if let Some(agent) = &result.agent_id {
                        task.assign_agent(agent.clone());
                    }
                    if cancelled {
                        task.cancel();
                    }
                    if result.success {
                        task.complete(result.output.clone());
                    } else {
                        let message = result
                            .error
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "unknown error".to_string());
                        task.fail(&message);
                    }
                    if let Some(returned) = returned {
                        task.metadata.extend(returned.metadata);
                    }
                }

                if result.success {
                    completed.insert(id.clone());
                    for dependent in dependents.get(&id).into_iter().flatten() {
                        if let Some(deps) = pending_deps.get_mut(dependent) {
                            deps.remove(&id);
                        }
                    }
                    if let Some(agent_id) = result.agent_id.clone() {
                        self.emit(SchedulerEvent::TaskCompleted {
                            task_id: id.clone(),
                            agent_id,
                        });
                    }
                } else {
                    failed.insert(id.clone());
                    if let Some(error) = result.error.clone() {
                        self.emit(SchedulerEvent::TaskFailed {
                            task_id: id.clone(),
                            error,
                        });
                    }
                }

                if let Some(callback) = on_progress {
                    callback(&id, &result);
                }

                results.insert(id, result);
            }
        }

        tlog!(
            "plan {} finished: {} completed, {} failed, {} round(s)",
            plan.id,
            completed.len(),
            failed.len(),
            round
        );
        self.emit(SchedulerEvent::PlanFinished {
            plan_id: plan.id.clone(),
            completed: completed.len(),
            failed: failed.len(),
        });

        Ok(results)
    }

    /// Dispatch one task, falling back across candidates in order.
    async fn execute_task(&self, plan_id: &str, task: Task, ctx: &ExecutionContext) -> Dispatch {
        let started = Instant::now();
        let task_id = task.id.clone();

        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.semaphore.acquire().await.ok();

        let candidates = self.find_agents_for_task(&task.required_capabilities).await;
        if candidates.is_empty() {
            let capabilities: Vec<String> = task.required_capabilities.iter().cloned().collect();
            tlog_warn!("no agent available for task {} ({:?})", task_id, capabilities);
            return Dispatch {
                result: ExecutionResult::failure(
                    task_id,
                    TaskError::NoAgentAvailable { capabilities },
                    started.elapsed(),
                    0,
                ),
                returned: None,
                cancelled: false,
            };
        }

        let timeout = self.timeout;
        let mut failures = 0;
        let mut last_error: Option<TaskError> = None;
        let mut cancelled = false;

        // Sequential on purpose: one agent at a time per task.
        for agent_id in &candidates {
            let handle = match self.registry.read().await.get(agent_id) {
                Some(handle) => handle,
                None => continue,
            };
            if !handle.can_execute() {
                tlog_debug!("skipping agent {} for task {}: circuit open", agent_id, task_id);
                continue;
            }

            let token = ctx.cancellation().child_token();
            let call = self.next_call.fetch_add(1, Ordering::Relaxed);
            self.active().insert(
                call,
                ActiveTask {
                    plan_id: plan_id.to_string(),
                    task_id: task_id.clone(),
                    agent_id: agent_id.clone(),
                    cancelled: false,
                    token: token.clone(),
                },
            );
            let call_ctx = ctx.with_agent(agent_id.clone()).with_cancellation(token);
            self.emit(SchedulerEvent::TaskStarted {
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
            });

            let outcome =
                tokio::time::timeout(timeout, handle.executor().execute(task.clone(), &call_ctx))
                    .await;
            if let Some(active) = self.active().remove(&call) {
                cancelled |= active.cancelled;
            }

            match outcome {
                Ok(Ok(returned)) => {
                    handle.record_success();
                    let success = returned.status == TaskStatus::Completed;
                    let error = if success {
                        None
                    } else {
                        Some(TaskError::AgentExecutionError {
                            agent_id: agent_id.clone(),
                            message: format!("agent returned task in state {}", returned.status),
                        })
                    };
                    return Dispatch {
                        result: ExecutionResult {
                            task_id,
                            success,
                            output: returned.output.clone(),
                            error,
                            duration: started.elapsed(),
                            retry_count: failures,
                            agent_id: Some(agent_id.clone()),
                        },
                        returned: Some(returned),
                        cancelled,
                    };
                }
                Ok(Err(e)) => {
                    handle.record_failure();
                    tlog_warn!("agent {} failed task {}: {}", agent_id, task_id, e);
                    last_error = Some(TaskError::AgentExecutionError {
                        agent_id: agent_id.clone(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    handle.record_failure();
                    tlog_warn!(
                        "agent {} timed out on task {} after {:?}",
                        agent_id,
                        task_id,
                        timeout
                    );
                    last_error = Some(TaskError::AgentExecutionTimeout {
                        agent_id: agent_id.clone(),
                        timeout,
                    });
                }
            }
            failures += 1;
        }

        Dispatch {
            result: ExecutionResult::failure(
                task_id,
                TaskError::AllAgentsFailed {
                    attempts: candidates.len(),
                    last: last_error.map(|e| e.to_string()),
                },
                started.elapsed(),
                candidates.len(),
            ),
            returned: None,
            cancelled,
        }
    }

    /// Mark an in-flight task cancelled in every plan running it.
    ///
    /// Advisory only: the agent call keeps running until it returns or
    /// times out. The call's context token is cancelled so cooperative
    /// agents can stop early. Returns false if the task is not in flight.
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        self.cancel_where(|entry| entry.task_id == *task_id)
    }

    /// Like [`cancel_task`](Self::cancel_task), limited to one plan.
    pub fn cancel_plan_task(&self, plan_id: &str, task_id: &TaskId) -> bool {
        self.cancel_where(|entry| entry.plan_id == plan_id && entry.task_id == *task_id)
    }

    fn cancel_where(&self, matches: impl Fn(&ActiveTask) -> bool) -> bool {
        let mut hit = false;
        for entry in self.active().values_mut() {
            if entry.cancelled || !matches(entry) {
                continue;
            }
            entry.cancelled = true;
            entry.token.cancel();
            tlog!(
                "task {} of plan {} on agent {} cancelled",
                entry.task_id,
                entry.plan_id,
                entry.agent_id
            );
            hit = true;
        }
        hit
    }

    /// Ids of tasks currently inside an agent call, one per call.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.active().values().map(|e| e.task_id.clone()).collect();
        ids.sort();
        ids
    }

    pub async fn get_status(&self) -> OrchestratorStatus {
        let registry = self.registry.read().await;
        OrchestratorStatus {
            registered_agents: registry.len(),
            active_tasks: self.active().len(),
            healthy_agents: registry.healthy_count(),
            breaker_states: registry.breaker_states(),
        }
    }
}
