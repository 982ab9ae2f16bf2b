//! Execution context passed through every agent call.

use crate::agent::AgentId;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Caller identity, tracing ids and free-form baggage for one execution.
///
/// The orchestrator hands each agent call its own copy via
/// [`ExecutionContext::with_agent`], with a child cancellation token that
/// `Orchestrator::cancel_task` triggers. Cancellation is cooperative: agents
/// that never look at [`ExecutionContext::is_cancelled`] simply run on.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub caller: Option<AgentId>,
    pub session_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub request_id: Option<String>,
    pub environment: String,
    pub baggage: HashMap<String, String>,
    cancellation: CancellationToken,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            caller: None,
            session_id: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            request_id: None,
            environment: "production".to_string(),
            baggage: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this context with `agent` as the caller.
    pub fn with_agent(&self, agent: AgentId) -> Self {
        let mut ctx = self.clone();
        ctx.caller = Some(agent);
        ctx
    }

    /// Copy of this context in a new span; the current span becomes the parent.
    pub fn with_trace(&self, trace_id: &str, span_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.trace_id = Some(trace_id.to_string());
        ctx.parent_span_id = self.span_id.clone();
        ctx.span_id = Some(span_id.to_string());
        ctx
    }

    pub fn with_baggage(mut self, key: &str, value: &str) -> Self {
        self.baggage.insert(key.to_string(), value.to_string());
        self
    }

    /// Replace the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that fires when this execution is cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once this execution is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}
