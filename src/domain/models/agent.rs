//! Agent registry model.
//!
//! Agents are opaque identifiers with lifecycle bookkeeping. The coordination
//! core never holds handles into the agent runtime; correlation happens
//! through ids and metadata only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle state of a registered agent.
///
/// Transitions: `Spawned → Active ↔ Idle → Terminated | Failed`.
/// A terminated agent never re-enters another state under the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Registered but has not yet sent a heartbeat
    Spawned,
    /// Heartbeating and accepting work
    Active,
    /// Alive but not accepting work
    Idle,
    /// Declared failed (missed heartbeats or explicit report)
    Failed,
    /// Cleanly shut down; id is retired
    Terminated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawned => "spawned",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "spawned" => Some(Self::Spawned),
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // Terminal states never transition out.
            (Self::Terminated, _) | (Self::Failed, _) => false,
            // Identity transitions are permitted (heartbeat refreshes).
            (a, b) if *a == b => true,
            (Self::Spawned, Self::Active | Self::Failed | Self::Terminated) => true,
            (Self::Active, Self::Idle | Self::Failed | Self::Terminated) => true,
            (Self::Idle, Self::Active | Self::Failed | Self::Terminated) => true,
            _ => false,
        }
    }

    /// Whether the agent counts as a live swarm member.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Spawned | Self::Active | Self::Idle)
    }
}

/// A registered agent as tracked by the lifecycle service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Opaque identifier, unique among live agents
    pub agent_id: String,
    /// Caller-defined agent type tag (e.g. "researcher", "builder")
    pub agent_type: String,
    /// Current lifecycle state
    pub state: AgentState,
    /// Capability tags for routing decisions
    pub capabilities: BTreeSet<String>,
    /// Last heartbeat received
    pub last_heartbeat: DateTime<Utc>,
    /// Arbitrary caller metadata (JSON object)
    pub metadata: serde_json::Value,
    /// When the agent was first registered
    pub registered_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Create a freshly spawned record.
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            state: AgentState::Spawned,
            capabilities: BTreeSet::new(),
            last_heartbeat: now,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            registered_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }
}
