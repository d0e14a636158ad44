//! Durable swarm event model.
//!
//! Events are append-only records: once inserted their `event_id` is assigned
//! by the store in commit order and the row is never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a swarm event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentSpawned,
    AgentHeartbeat,
    AgentIdle,
    AgentFailed,
    AgentTerminated,
    ProposalCreated,
    VoteRecorded,
    ProposalDecided,
    BroadcastSent,
    TopologyChanged,
    /// Escape hatch for caller-defined event types.
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentSpawned => "agent_spawned",
            Self::AgentHeartbeat => "agent_heartbeat",
            Self::AgentIdle => "agent_idle",
            Self::AgentFailed => "agent_failed",
            Self::AgentTerminated => "agent_terminated",
            Self::ProposalCreated => "proposal_created",
            Self::VoteRecorded => "vote_recorded",
            Self::ProposalDecided => "proposal_decided",
            Self::BroadcastSent => "broadcast_sent",
            Self::TopologyChanged => "topology_changed",
            Self::Custom(s) => s.as_str(),
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "agent_spawned" => Self::AgentSpawned,
            "agent_heartbeat" => Self::AgentHeartbeat,
            "agent_idle" => Self::AgentIdle,
            "agent_failed" => Self::AgentFailed,
            "agent_terminated" => Self::AgentTerminated,
            "proposal_created" => Self::ProposalCreated,
            "vote_recorded" => Self::VoteRecorded,
            "proposal_decided" => Self::ProposalDecided,
            "broadcast_sent" => Self::BroadcastSent,
            "topology_changed" => Self::TopologyChanged,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// One append-only event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Store-assigned monotonic id; 0 until inserted
    pub event_id: i64,
    /// Event classification
    pub kind: EventKind,
    /// Agent the event concerns, if any
    pub agent_id: Option<String>,
    /// When the event was created
    pub ts: DateTime<Utc>,
    /// Structured payload (JSON)
    pub payload: serde_json::Value,
}

impl SwarmEvent {
    /// Create an event ready for insertion (`event_id` assigned by the store).
    pub fn new(kind: EventKind, agent_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: 0,
            kind,
            agent_id,
            ts: Utc::now(),
            payload,
        }
    }
}

/// Filter for querying stored events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Minimum event id (inclusive)
    pub since_id: Option<i64>,
    /// Filter by agent id
    pub agent_id: Option<String>,
    /// Filter by event kind
    pub kind: Option<EventKind>,
    /// Events at or after this time
    pub since_time: Option<DateTime<Utc>>,
    /// Maximum rows returned
    pub limit: Option<u32>,
    /// Ascending by event id when true (default descending)
    pub ascending: bool,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since_id(mut self, id: i64) -> Self {
        self.since_id = Some(id);
        self
    }

    pub fn agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn since_time(mut self, time: DateTime<Utc>) -> Self {
        self.since_time = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }
}
