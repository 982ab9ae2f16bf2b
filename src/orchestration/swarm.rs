//! Swarm coordination: membership, voting, and task allocation.
//!
//! A [`SwarmCoordinator`] manages a bounded group of agents independently of
//! the dependency scheduler. Members vote on proposals during a fixed-length
//! window, and incoming tasks are handed to members by an
//! [`AllocationStrategy`]. Everything is local to one coordinator instance.

use crate::agent::{satisfies, AgentId, Capabilities};
use crate::config::{SwarmSettings, DEFAULT_VOTE_TIMEOUT};
use crate::core::{Task, TaskId};
use crate::error::Result;
use crate::{tlog, tlog_debug, tlog_error, tlog_warn};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Rule used to tally a proposal's votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusType {
    /// Every member voted yes and nobody voted no.
    Unanimous,
    /// Strictly more than half of the members voted yes.
    #[default]
    Majority,
    /// A single yes vote decides.
    Leader,
}

impl ConsensusType {
    /// Whether `yes`/`no` votes reach consensus among `members` members.
    pub fn reached(self, yes: usize, no: usize, members: usize) -> bool {
        match self {
            ConsensusType::Unanimous => yes == members && no == 0,
            ConsensusType::Majority => yes * 2 > members,
            ConsensusType::Leader => yes >= 1,
        }
    }
}

/// How [`SwarmCoordinator::distribute_task`] picks a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Cycle through current members.
    #[default]
    RoundRobin,
    /// First member whose capabilities cover the task's requirements.
    Capability,
    /// Auction placeholder: the first member. Real bidding lives elsewhere.
    Bid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwarmConfig {
    pub name: String,
    pub coordinator_id: AgentId,
    pub consensus: ConsensusType,
    pub vote_timeout: Duration,
    /// Advisory: reported by [`SwarmStatus::below_minimum`], never enforced.
    pub min_agents: usize,
    pub max_agents: usize,
    pub allocation: AllocationStrategy,
}

impl SwarmConfig {
    pub fn new(name: &str, coordinator_id: impl Into<AgentId>) -> Self {
        let defaults = SwarmSettings::default();
        Self {
            name: name.to_string(),
            coordinator_id: coordinator_id.into(),
            consensus: defaults.consensus,
            vote_timeout: DEFAULT_VOTE_TIMEOUT,
            min_agents: defaults.min_agents,
            max_agents: defaults.max_agents,
            allocation: defaults.allocation,
        }
    }

    /// Fails with `Error::Validation` for a bad vote timeout or
    /// `min_agents > max_agents`.
    pub fn from_settings(
        name: &str,
        coordinator_id: impl Into<AgentId>,
        settings: &SwarmSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            name: name.to_string(),
            coordinator_id: coordinator_id.into(),
            consensus: settings.consensus,
            vote_timeout: settings.vote_timeout()?,
            min_agents: settings.min_agents,
            max_agents: settings.max_agents,
            allocation: settings.allocation,
        })
    }

    pub fn with_consensus(mut self, consensus: ConsensusType) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn with_allocation(mut self, allocation: AllocationStrategy) -> Self {
        self.allocation = allocation;
        self
    }

    pub fn with_max_agents(mut self, max_agents: usize) -> Self {
        self.max_agents = max_agents;
        self
    }

    pub fn with_vote_timeout(mut self, timeout: Duration) -> Self {
        self.vote_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMember {
    pub agent_id: AgentId,
    pub capabilities: Capabilities,
    pub metadata: HashMap<String, Value>,
    pub joined_at: DateTime<Utc>,
    /// Tasks allocated to this member so far.
    pub task_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: String,
    pub voter: AgentId,
    pub approve: bool,
    pub reason: String,
    pub cast_at: DateTime<Utc>,
}

/// Tally of a closed proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub proposal_id: String,
    pub consensus: bool,
    pub yes_votes: usize,
    pub no_votes: usize,
    /// Member count when the window closed.
    pub total_members: usize,
}

/// A proposal whose voting window is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenProposal {
    pub proposal_id: String,
    pub action: String,
    pub payload: Value,
    pub votes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmStatus {
    pub id: String,
    pub name: String,
    pub members: usize,
    pub member_ids: Vec<AgentId>,
    pub active_proposals: usize,
    pub allocated_tasks: usize,
    pub below_minimum: bool,
}

/// Events emitted by a [`SwarmCoordinator`].
#[derive(Debug, Clone, PartialEq)]
pub enum SwarmEvent {
    MemberJoined { agent_id: AgentId, members: usize },
    MemberLeft { agent_id: AgentId, members: usize },
    ProposalOpened { proposal_id: String, action: String },
    ProposalClosed(ProposalOutcome),
    TaskDistributed { task_id: TaskId, agent_id: AgentId },
}

type MemberCallback = Arc<dyn Fn(AgentId) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Proposal {
    action: String,
    payload: Value,
    votes: Vec<Vote>,
}

#[derive(Default)]
struct SwarmState {
    /// Members in join order.
    members: Vec<SwarmMember>,
    member_tasks: HashMap<AgentId, JoinHandle<()>>,
    proposals: BTreeMap<String, Proposal>,
    allocations: HashMap<TaskId, AgentId>,
    round_robin_index: usize,
}

impl SwarmState {
    fn position(&self, id: &AgentId) -> Option<usize> {
        self.members.iter().position(|m| &m.agent_id == id)
    }

    fn member_ids(&self) -> Vec<AgentId> {
        self.members.iter().map(|m| m.agent_id.clone()).collect()
    }
}

/// Coordinator for one swarm of agents.
///
/// # Example
///
/// ```ignore
/// let swarm = SwarmCoordinator::new(SwarmConfig::new("research", "leader"));
/// swarm.join("agent-1", ["search"], HashMap::new()).await;
/// swarm.join("agent-2", ["search"], HashMap::new()).await;
///
/// let outcome = swarm.propose("accept_task", json!({"task_id": "123"}), None).await;
/// if outcome.consensus {
///     swarm.distribute_task(&task).await;
/// }
/// ```
pub struct SwarmCoordinator {
    id: String,
    config: SwarmConfig,
    state: Mutex<SwarmState>,
    on_join: Vec<MemberCallback>,
    on_leave: Vec<MemberCallback>,
    event_tx: Option<mpsc::Sender<SwarmEvent>>,
}

impl SwarmCoordinator {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            id: format!("swarm-{}", &Uuid::new_v4().simple().to_string()[..12]),
            config,
            state: Mutex::new(SwarmState::default()),
            on_join: Vec::new(),
            on_leave: Vec::new(),
            event_tx: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<SwarmEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Run `callback` after every successful join. Errors are logged.
    pub fn on_join<F, Fut>(&mut self, callback: F)
    where
        F: Fn(AgentId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_join.push(Arc::new(move |id| -> BoxFuture<'static, Result<()>> {
            Box::pin(callback(id))
        }));
    }

    /// Run `callback` after every successful leave. Errors are logged.
    pub fn on_leave<F, Fut>(&mut self, callback: F)
    where
        F: Fn(AgentId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_leave.push(Arc::new(move |id| -> BoxFuture<'static, Result<()>> {
            Box::pin(callback(id))
        }));
    }

    fn emit(&self, event: SwarmEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(TrySendError::Full(event)) = tx.try_send(event) {
                tlog_debug!("swarm {} event channel full, dropping {:?}", self.id, event);
            }
        }
    }

    async fn notify(&self, callbacks: &[MemberCallback], agent_id: &AgentId, hook: &str) {
        for callback in callbacks {
            if let Err(e) = callback(agent_id.clone()).await {
                tlog_error!("swarm {} {} callback failed for {}: {}", self.id, hook, agent_id, e);
            }
        }
    }

    // ========== Membership ==========

    /// Add an agent. Rejected when the swarm is already at `max_agents`.
    ///
    /// Joining again under an existing id replaces that member's record in
    /// place, resetting its task count.
    pub async fn join<I, S>(
        &self,
        agent_id: impl Into<AgentId>,
        capabilities: I,
        metadata: HashMap<String, Value>,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent_id = agent_id.into();
        let members = {
            let mut state = self.state.lock().await;
            if state.members.len() >= self.config.max_agents {
                tlog_warn!(
                    "swarm {} is full ({}), rejecting {}",
                    self.id,
                    self.config.max_agents,
                    agent_id
                );
                return false;
            }

            let member = SwarmMember {
                agent_id: agent_id.clone(),
                capabilities: crate::agent::capabilities(capabilities),
                metadata,
                joined_at: Utc::now(),
                task_count: 0,
            };
            match state.position(&agent_id) {
                Some(i) => state.members[i] = member,
                None => state.members.push(member),
            }
            state.members.len()
        };

        tlog!("agent {} joined swarm {} ({} members)", agent_id, self.id, members);
        self.emit(SwarmEvent::MemberJoined {
            agent_id: agent_id.clone(),
            members,
        });
        self.notify(&self.on_join, &agent_id, "join").await;
        true
    }

    /// Remove a member, abort any task tracked for it and drop its
    /// allocations.
    pub async fn leave(&self, agent_id: &AgentId) -> bool {
        let members = {
            let mut state = self.state.lock().await;
            let Some(i) = state.position(agent_id) else {
                return false;
            };
            state.members.remove(i);
            if let Some(handle) = state.member_tasks.remove(agent_id) {
                handle.abort();
            }
            state.allocations.retain(|_, owner| owner != agent_id);
            state.members.len()
        };

        tlog!("agent {} left swarm {} ({} members)", agent_id, self.id, members);
        self.emit(SwarmEvent::MemberLeft {
            agent_id: agent_id.clone(),
            members,
        });
        self.notify(&self.on_leave, agent_id, "leave").await;
        true
    }

    /// Attach a background task to a member; it is aborted when the member
    /// leaves. A previously tracked task for the same member is aborted.
    /// Returns false (leaving the task running) if `agent_id` is not a member.
    pub async fn track_member_task(&self, agent_id: &AgentId, handle: JoinHandle<()>) -> bool {
        let mut state = self.state.lock().await;
        if state.position(agent_id).is_none() {
            return false;
        }
        if let Some(previous) = state.member_tasks.insert(agent_id.clone(), handle) {
            previous.abort();
        }
        true
    }

    pub async fn members(&self) -> Vec<AgentId> {
        self.state.lock().await.member_ids()
    }

    pub async fn member(&self, agent_id: &AgentId) -> Option<SwarmMember> {
        let state = self.state.lock().await;
        state.position(agent_id).map(|i| state.members[i].clone())
    }

    // ========== Consensus ==========

    /// Open a proposal, wait the full voting window, then tally.
    ///
    /// The window never closes early on quorum. `timeout` of `None` (or
    /// zero) uses the configured `vote_timeout`.
    pub async fn propose(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ProposalOutcome {
        let window = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.vote_timeout);
        let proposal_id = self.open_proposal(action, payload).await;

        tokio::time::sleep(window).await;

        self.close_proposal(&proposal_id)
            .await
            .unwrap_or_else(|| self.empty_outcome(proposal_id))
    }

    fn empty_outcome(&self, proposal_id: String) -> ProposalOutcome {
        ProposalOutcome {
            proposal_id,
            consensus: false,
            yes_votes: 0,
            no_votes: 0,
            total_members: 0,
        }
    }

    /// Open a proposal without waiting. Pair with [`close_proposal`](Self::close_proposal).
    pub async fn open_proposal(&self, action: &str, payload: Value) -> String {
        let proposal_id = format!("prop-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.state.lock().await.proposals.insert(
            proposal_id.clone(),
            Proposal {
                action: action.to_string(),
                payload,
                votes: Vec::new(),
            },
        );

        tlog!("swarm {} opened proposal {} ({})", self.id, proposal_id, action);
        self.emit(SwarmEvent::ProposalOpened {
            proposal_id: proposal_id.clone(),
            action: action.to_string(),
        });
        proposal_id
    }

    /// Tally and discard a proposal. `None` if it is not open.
    pub async fn close_proposal(&self, proposal_id: &str) -> Option<ProposalOutcome> {
        let outcome = {
            let mut state = self.state.lock().await;
            let proposal = state.proposals.remove(proposal_id)?;
            let yes = proposal.votes.iter().filter(|v| v.approve).count();
            let no = proposal.votes.len() - yes;
            let total = state.members.len();
            tlog_debug!(
                "swarm {} tally for {} ({}): {} yes, {} no, {} members",
                self.id,
                proposal_id,
                proposal.action,
                yes,
                no,
                total
            );
            ProposalOutcome {
                proposal_id: proposal_id.to_string(),
                consensus: self.config.consensus.reached(yes, no, total),
                yes_votes: yes,
                no_votes: no,
                total_members: total,
            }
        };

        tlog!(
            "swarm {} closed proposal {}: consensus={}",
            self.id,
            proposal_id,
            outcome.consensus
        );
        self.emit(SwarmEvent::ProposalClosed(outcome.clone()));
        Some(outcome)
    }

    /// Cast a vote. Rejected if the proposal is not open or the voter is not
    /// a member. Repeat votes from one member are all counted.
    pub async fn vote(
        &self,
        proposal_id: &str,
        agent_id: &AgentId,
        approve: bool,
        reason: &str,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.position(agent_id).is_none() {
            tlog_debug!("rejecting vote from non-member {} on {}", agent_id, proposal_id);
            return false;
        }
        let Some(proposal) = state.proposals.get_mut(proposal_id) else {
            return false;
        };
        proposal.votes.push(Vote {
            proposal_id: proposal_id.to_string(),
            voter: agent_id.clone(),
            approve,
            reason: reason.to_string(),
            cast_at: Utc::now(),
        });
        true
    }

    /// Proposals whose window is still open, by id.
    pub async fn open_proposals(&self) -> Vec<OpenProposal> {
        self.state
            .lock()
            .await
            .proposals
            .iter()
            .map(|(id, p)| OpenProposal {
                proposal_id: id.clone(),
                action: p.action.clone(),
                payload: p.payload.clone(),
                votes: p.votes.len(),
            })
            .collect()
    }

    // ========== Allocation ==========

    /// Pick a member for `task` by the configured strategy.
    ///
    /// Returns `None` when the swarm is empty or, for capability matching,
    /// no member qualifies. Round-robin indexes the current member list, so
    /// joins and leaves between calls can shift the rotation.
    pub async fn distribute_task(&self, task: &Task) -> Option<AgentId> {
        let agent_id = {
            let mut state = self.state.lock().await;
            if state.members.is_empty() {
                return None;
            }

            let index = match self.config.allocation {
                AllocationStrategy::RoundRobin => {
                    let i = state.round_robin_index % state.members.len();
                    state.round_robin_index += 1;
                    Some(i)
                }
                AllocationStrategy::Capability => state
                    .members
                    .iter()
                    .position(|m| satisfies(&m.capabilities, &task.required_capabilities)),
                AllocationStrategy::Bid => Some(0),
            }?;

            let member = &mut state.members[index];
            member.task_count += 1;
            let agent_id = member.agent_id.clone();
            state.allocations.insert(task.id.clone(), agent_id.clone());
            agent_id
        };

        tlog!("swarm {} assigned task {} to {}", self.id, task.id, agent_id);
        self.emit(SwarmEvent::TaskDistributed {
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
        });
        Some(agent_id)
    }

    /// Member a task was last allocated to.
    pub async fn allocation_for(&self, task_id: &TaskId) -> Option<AgentId> {
        self.state.lock().await.allocations.get(task_id).cloned()
    }

    /// Forget a finished task's allocation, returning the member it was on.
    ///
    /// The member's `task_count` is cumulative and is not decremented.
    pub async fn complete_task(&self, task_id: &TaskId) -> Option<AgentId> {
        let agent_id = self.state.lock().await.allocations.remove(task_id)?;
        tlog_debug!("swarm {} released task {} from {}", self.id, task_id, agent_id);
        Some(agent_id)
    }

    pub async fn status(&self) -> SwarmStatus {
        let state = self.state.lock().await;
        SwarmStatus {
            id: self.id.clone(),
            name: self.config.name.clone(),
            members: state.members.len(),
            member_ids: state.member_ids(),
            active_proposals: state.proposals.len(),
            allocated_tasks: state.allocations.len(),
            below_minimum: state.members.len() < self.config.min_agents,
        }
    }
}
