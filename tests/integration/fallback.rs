//! Candidate fallback, circuit breaker, and cancellation tests.
//!
//! These tests verify that failing or slow agents are skipped in favour of
//! healthy ones, that breakers gate calls to repeatedly failing agents, and
//! that cancellation is advisory.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use taskmesh::agent::AgentId;
use taskmesh::config::OrchestratorConfig;
use taskmesh::core::{ExecutionContext, Task, TaskId, TaskPlan, TaskStatus};
use taskmesh::orchestration::{CircuitState, Orchestrator, SchedulerEvent, TaskExecutor};
use taskmesh::{Error, Result, TaskError};

use crate::fixtures::{test_task, Harness, TestAgent};

fn single_task_plan(id: &str) -> TaskPlan {
    let mut plan = TaskPlan::new(id);
    plan.add_task(test_task(id));
    plan
}

async fn run_one(orchestrator: &Orchestrator, id: &str) -> taskmesh::orchestration::ExecutionResult {
    let mut plan = single_task_plan(id);
    let mut results = orchestrator
        .execute(&mut plan, &ExecutionContext::new(), None)
        .await
        .unwrap();
    results.remove(&TaskId::from(id)).unwrap()
}

async fn breaker_of(orchestrator: &Orchestrator, id: &str) -> (CircuitState, u32) {
    let registry = orchestrator.registry();
    let handle = registry.read().await.get(&AgentId::from(id)).unwrap();
    let metrics = handle.breaker_metrics();
    (metrics.state, metrics.failure_count)
}

/// Test: Open breaker routes work to the next candidate
/// Given agent A that always fails and agent B that succeeds
/// When A has failed failure_threshold times
/// Then A's breaker is open and the next task goes straight to B without touching A
#[tokio::test]
async fn test_open_breaker_skips_agent() {
    let harness = Harness::with_max_concurrent(10);
    let a = TestAgent::failing("A").shared();
    let b = TestAgent::echo("B").shared();
    harness.add_agent(&a, &["work"]).await;
    harness.add_agent(&b, &["work"]).await;

    for i in 0..5 {
        let result = run_one(&harness.orchestrator, &format!("t{}", i)).await;
        assert!(result.success);
        assert_eq!(result.agent_id, Some(AgentId::from("B")));
        assert_eq!(result.retry_count, 1);
    }
    assert_eq!(breaker_of(&harness.orchestrator, "A").await, (CircuitState::Open, 5));

    let result = run_one(&harness.orchestrator, "after-open").await;
    assert!(result.success);
    assert_eq!(result.agent_id, Some(AgentId::from("B")));
    assert_eq!(result.retry_count, 0);
    assert_eq!(a.calls(), 5);
    assert_eq!(breaker_of(&harness.orchestrator, "A").await, (CircuitState::Open, 5));

    let status = harness.orchestrator.get_status().await;
    assert_eq!(status.breaker_states[&AgentId::from("A")], CircuitState::Open);
    assert_eq!(status.breaker_states[&AgentId::from("B")], CircuitState::Closed);
}

/// Test: Breaker probes again after the recovery timeout
/// Given agent A with an open breaker
/// When recovery_timeout elapses and a failing probe is sent
/// Then A is tried once more and the breaker reopens
#[tokio::test(start_paused = true)]
async fn test_breaker_probe_after_recovery() {
    let harness = Harness::with_max_concurrent(10);
    let a = TestAgent::failing("A").shared();
    let b = TestAgent::echo("B").shared();
    harness.add_agent(&a, &["work"]).await;
    harness.add_agent(&b, &["work"]).await;

    for i in 0..5 {
        run_one(&harness.orchestrator, &format!("t{}", i)).await;
    }
    assert_eq!(a.calls(), 5);

    tokio::time::advance(Duration::from_secs(30)).await;
    let result = run_one(&harness.orchestrator, "probe").await;

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(a.calls(), 6);
    assert_eq!(breaker_of(&harness.orchestrator, "A").await, (CircuitState::Open, 6));
}

/// Test: Disabled breakers never gate
/// Given enable_circuit_breaker = false and an always-failing first agent
/// When more tasks than failure_threshold run
/// Then the failing agent is tried every time and no breaker state is reported
#[tokio::test]
async fn test_disabled_breaker_never_gates() {
    let harness = Harness::new(OrchestratorConfig {
        enable_circuit_breaker: false,
        ..Default::default()
    });
    let a = TestAgent::failing("A").shared();
    let b = TestAgent::echo("B").shared();
    harness.add_agent(&a, &["work"]).await;
    harness.add_agent(&b, &["work"]).await;

    for i in 0..7 {
        assert!(run_one(&harness.orchestrator, &format!("t{}", i)).await.success);
    }
    assert_eq!(a.calls(), 7);
    assert!(harness.orchestrator.get_status().await.breaker_states.is_empty());
}

/// Test: Timeout falls back to the next agent
/// Given a first agent slower than default_timeout
/// When a task runs
/// Then it times out, the second agent serves it, and the slow agent records a failure
#[tokio::test(start_paused = true)]
async fn test_timeout_fallback() {
    let mut harness = Harness::new(OrchestratorConfig {
        default_timeout_secs: 2.0,
        ..Default::default()
    });
    let slow = TestAgent::echo("slow")
        .with_delay(Duration::from_secs(60))
        .shared();
    let fast = TestAgent::echo("fast").shared();
    harness.add_agent(&slow, &["work"]).await;
    harness.add_agent(&fast, &["work"]).await;

    let result = run_one(&harness.orchestrator, "t").await;
    assert!(result.success);
    assert_eq!(result.agent_id, Some(AgentId::from("fast")));
    assert_eq!(result.retry_count, 1);
    assert!(result.duration >= Duration::from_secs(2));
    assert!(result.duration < Duration::from_secs(60));
    assert_eq!(breaker_of(&harness.orchestrator, "slow").await, (CircuitState::Closed, 1));

    let started: Vec<AgentId> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskStarted { agent_id, .. } => Some(agent_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![AgentId::from("slow"), AgentId::from("fast")]);
}

/// Test: Every candidate failing is a task failure, not a crash
/// Given two agents that both fail
/// When a task runs
/// Then the result is AllAgentsFailed after trying both
#[tokio::test]
async fn test_all_agents_failed() {
    let harness = Harness::with_max_concurrent(10);
    let a = TestAgent::failing("A").shared();
    let b = TestAgent::failing("B").shared();
    harness.add_agent(&a, &["work"]).await;
    harness.add_agent(&b, &["work"]).await;

    let mut plan = single_task_plan("t");
    let results = harness
        .orchestrator
        .execute(&mut plan, &ExecutionContext::new(), None)
        .await
        .unwrap();

    let result = &results[&TaskId::from("t")];
    assert!(!result.success);
    assert_eq!(result.retry_count, 2);
    assert!(matches!(
        result.error,
        Some(TaskError::AllAgentsFailed { attempts: 2, .. })
    ));
    assert_eq!(a.calls() + b.calls(), 2);
    assert!(matches!(plan.tasks[0].status, TaskStatus::Failed { .. }));
}

/// Test: Unhealthy agents are not candidates
/// Given agents A and B where A is marked unhealthy
/// When a task runs
/// Then only B is called
#[tokio::test]
async fn test_unhealthy_agent_skipped() {
    let harness = Harness::with_max_concurrent(10);
    let a = TestAgent::echo("A").shared();
    let b = TestAgent::echo("B").shared();
    harness.add_agent(&a, &["work"]).await;
    harness.add_agent(&b, &["work"]).await;
    assert!(harness.orchestrator.set_agent_health(&AgentId::from("A"), false).await);

    let result = run_one(&harness.orchestrator, "t").await;
    assert_eq!(result.agent_id, Some(AgentId::from("B")));
    assert_eq!(a.calls(), 0);
    assert_eq!(harness.orchestrator.get_status().await.healthy_agents, 1);
}

/// Waits for cancellation or a long sleep; errors when cancelled.
struct Cooperative;

#[async_trait]
impl TaskExecutor for Cooperative {
    fn id(&self) -> AgentId {
        AgentId::from("cooperative")
    }

    async fn execute(&self, mut task: Task, ctx: &ExecutionContext) -> Result<Task> {
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Agent("stopped on cancel".to_string())),
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                task.complete(json!("finished"));
                Ok(task)
            }
        }
    }
}

/// Test: Cancelling an in-flight task
/// Given a cooperative agent running a task
/// When cancel_task is called
/// Then the agent stops early and the task stays Cancelled in the plan
#[tokio::test(start_paused = true)]
async fn test_cancel_in_flight_task() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let orchestrator = Orchestrator::new(OrchestratorConfig::default())
        .unwrap()
        .with_events(tx);
    let orchestrator = std::sync::Arc::new(orchestrator);
    orchestrator.register_agent(Cooperative, ["work"]).await;

    let runner = std::sync::Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move {
        let mut plan = single_task_plan("long");
        let results = runner
            .execute(&mut plan, &ExecutionContext::new(), None)
            .await
            .unwrap();
        (plan, results)
    });

    loop {
        match rx.recv().await {
            Some(SchedulerEvent::TaskStarted { .. }) => break,
            Some(_) => continue,
            None => panic!("event channel closed before task started"),
        }
    }
    assert!(orchestrator.cancel_task(&TaskId::from("long")));

    let (plan, results) = handle.await.unwrap();
    let result = &results[&TaskId::from("long")];
    assert!(!result.success);
    assert!(result.duration < Duration::from_secs(60));
    assert_eq!(plan.tasks[0].status, TaskStatus::Cancelled);
    assert!(orchestrator.active_tasks().is_empty());
}

/// Test: Cancelling a task that is not running
/// Given an idle orchestrator
/// When cancel_task is called for an unknown id
/// Then it returns false
#[tokio::test]
async fn test_cancel_unknown_task() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
    assert!(!orchestrator.cancel_task(&TaskId::from("ghost")));
}
