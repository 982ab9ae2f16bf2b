//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scriptable test agents (echo, failing, delayed)
//! - A concurrency probe that records peak parallelism
//! - An orchestrator harness with a drained event channel
//! - Predefined plan shapes

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use taskmesh::agent::AgentId;
use taskmesh::config::OrchestratorConfig;
use taskmesh::core::{ExecutionContext, Task, TaskId, TaskPlan};
use taskmesh::orchestration::{Orchestrator, SchedulerEvent, TaskExecutor};
use taskmesh::{Error, Result};

/// Tracks how many agent calls are in flight at once.
#[derive(Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A scriptable agent.
///
/// Completes tasks with `{"agent": id, "task": task_id}` unless built with
/// [`TestAgent::failing`]. Records when each call started.
pub struct TestAgent {
    id: AgentId,
    fail: bool,
    delay: Duration,
    task_delays: HashMap<TaskId, Duration>,
    probe: Option<Arc<ConcurrencyProbe>>,
    calls: AtomicUsize,
    starts: Mutex<Vec<(TaskId, Instant)>>,
}

impl TestAgent {
    pub fn echo(id: &str) -> Self {
        Self {
            id: AgentId::from(id),
            fail: false,
            delay: Duration::ZERO,
            task_delays: HashMap::new(),
            probe: None,
            calls: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::echo(id)
        }
    }

    /// Sleep this long in every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep this long when handling one specific task.
    pub fn with_task_delay(mut self, task: &str, delay: Duration) -> Self {
        self.task_delays.insert(TaskId::from(task), delay);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When the call for `task` started, if it was ever called.
    pub fn started_at(&self, task: &str) -> Option<Instant> {
        let task = TaskId::from(task);
        self.starts
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == task)
            .map(|(_, at)| *at)
    }
}

#[async_trait]
impl TaskExecutor for TestAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    async fn execute(&self, mut task: Task, _ctx: &ExecutionContext) -> Result<Task> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts
            .lock()
            .unwrap()
            .push((task.id.clone(), Instant::now()));

        if let Some(probe) = &self.probe {
            probe.enter();
        }
        let delay = self.task_delays.get(&task.id).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(probe) = &self.probe {
            probe.exit();
        }

        if self.fail {
            return Err(Error::Agent(format!("{} refused {}", self.id, task.id)));
        }
        let output = json!({ "agent": self.id.as_str(), "task": task.id.as_str() });
        task.complete(output);
        Ok(task)
    }
}

/// Orchestrator plus the receiving end of its event channel.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub event_rx: mpsc::Receiver<SchedulerEvent>,
}

impl Harness {
    pub fn new(config: OrchestratorConfig) -> Self {
        let (tx, event_rx) = mpsc::channel(256);
        Self {
            orchestrator: Orchestrator::new(config).unwrap().with_events(tx),
            event_rx,
        }
    }

    pub fn with_max_concurrent(max_concurrent_tasks: usize) -> Self {
        Self::new(OrchestratorConfig {
            max_concurrent_tasks,
            ..Default::default()
        })
    }

    /// Register a shared agent under capability `cap`.
    pub async fn add_agent(&self, agent: &Arc<TestAgent>, caps: &[&str]) -> AgentId {
        self.orchestrator
            .register_shared(
                agent.clone(),
                taskmesh::agent::capabilities(caps.iter().copied()),
            )
            .await
    }

    /// Every event emitted so far.
    pub fn events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// The batches dispatched per round, in order.
pub fn rounds(events: &[SchedulerEvent]) -> Vec<Vec<TaskId>> {
    events
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::RoundStarted { tasks, .. } => Some(tasks.clone()),
            _ => None,
        })
        .collect()
}

pub fn ids(names: &[&str]) -> Vec<TaskId> {
    names.iter().map(|n| TaskId::from(*n)).collect()
}

/// A task with a readable id needing capability `work`.
pub fn test_task(id: &str) -> Task {
    Task::new(id, &format!("goal of {}", id))
        .with_id(id)
        .with_capabilities(["work"])
}

/// a -> {b, c} -> d
pub fn diamond_plan() -> TaskPlan {
    let mut plan = TaskPlan::new("diamond");
    for id in ["a", "b", "c", "d"] {
        plan.add_task(test_task(id));
    }
    plan.add_dependency(&TaskId::from("b"), &TaskId::from("a"));
    plan.add_dependency(&TaskId::from("c"), &TaskId::from("a"));
    plan.add_dependency(&TaskId::from("d"), &TaskId::from("b"));
    plan.add_dependency(&TaskId::from("d"), &TaskId::from("c"));
    plan
}

/// `n` tasks `t0..t{n-1}` with no dependencies.
pub fn independent_plan(n: usize) -> TaskPlan {
    let mut plan = TaskPlan::new("independent");
    for i in 0..n {
        plan.add_task(test_task(&format!("t{}", i)));
    }
    plan
}
