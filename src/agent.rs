//! Agent identity and capability tags.
//!
//! An agent is anything that can execute a task. The orchestration layer only
//! ever sees its identity and the capability tags it declared; capabilities
//! are opaque strings compared by set membership.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Set of capability tags, ordered for deterministic output.
pub type Capabilities = BTreeSet<String>;

/// Build a capability set from anything string-like.
pub fn capabilities<I, S>(tags: I) -> Capabilities
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

/// Check whether `offered` covers every tag in `required`.
pub fn satisfies(offered: &Capabilities, required: &Capabilities) -> bool {
    required.is_subset(offered)
}

/// Identity of an agent.
///
/// Agents name themselves, so this is a string rather than a UUID. `new()`
/// generates a random `agent-xxxxxxxx` name for callers that don't care.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new random agent identifier.
    pub fn new() -> Self {
        Self(format!("agent-{}", &Uuid::new_v4().simple().to_string()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
