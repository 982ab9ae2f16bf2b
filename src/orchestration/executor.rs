//! The agent-facing seam: anything that can execute a task.

use crate::agent::AgentId;
use crate::core::{ExecutionContext, Task};
use crate::error::Result;
use crate::{tlog_debug, tlog_warn};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// A worker the orchestrator can dispatch tasks to.
///
/// `execute` receives an owned copy of the task and returns it in its final
/// state: `Completed` with `output` filled in on success. Returning `Err`
/// (or taking longer than the orchestrator's timeout) counts as a failed
/// call against the agent's circuit breaker.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn id(&self) -> AgentId;

    async fn execute(&self, task: Task, ctx: &ExecutionContext) -> Result<Task>;
}

#[async_trait]
impl<T: TaskExecutor + ?Sized> TaskExecutor for Arc<T> {
    fn id(&self) -> AgentId {
        (**self).id()
    }

    async fn execute(&self, task: Task, ctx: &ExecutionContext) -> Result<Task> {
        (**self).execute(task, ctx).await
    }
}

/// Agent backed by an async closure.
///
/// ```ignore
/// let agent = FnExecutor::new("echo", |mut task: Task, _ctx| async move {
///     let output = task.input.clone();
///     task.complete(output);
///     Ok(task)
/// });
/// ```
pub struct FnExecutor<F> {
    id: AgentId,
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(id: impl Into<AgentId>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Task>> + Send,
{
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    async fn execute(&self, task: Task, ctx: &ExecutionContext) -> Result<Task> {
        (self.f)(task, ctx.clone()).await
    }
}

/// Wraps an agent with call logging.
///
/// Compose at registration time:
/// `orchestrator.register_agent(Logged::new(agent), caps)`.
pub struct Logged<E> {
    inner: E,
}

impl<E> Logged<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

#[async_trait]
impl<E: TaskExecutor> TaskExecutor for Logged<E> {
    fn id(&self) -> AgentId {
        self.inner.id()
    }

    async fn execute(&self, task: Task, ctx: &ExecutionContext) -> Result<Task> {
        let agent = self.inner.id();
        let task_id = task.id.clone();
        let started = Instant::now();
        tlog_debug!("agent {} starting task {}", agent, task_id);

        let result = self.inner.execute(task, ctx).await;
        match &result {
            Ok(task) => tlog_debug!(
                "agent {} finished task {} as {} in {:?}",
                agent,
                task_id,
                task.status,
                started.elapsed()
            ),
            Err(e) => tlog_warn!(
                "agent {} failed task {} after {:?}: {}",
                agent,
                task_id,
                started.elapsed(),
                e
            ),
        }
        result
    }
}
