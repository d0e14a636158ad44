//! Proposals, votes, and consensus results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An agent's opinion on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
}

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::For => "FOR",
            Self::Against => "AGAINST",
            Self::Abstain => "ABSTAIN",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "FOR" => Some(Self::For),
            "AGAINST" => Some(Self::Against),
            "ABSTAIN" => Some(Self::Abstain),
            _ => None,
        }
    }
}

/// A single recorded vote.
///
/// At most one vote is accepted per `(proposal_id, agent_id)`; later
/// attempts are rejected by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: u64,
    pub agent_id: String,
    pub choice: VoteChoice,
    /// Voting weight; meaningful for the weighted algorithm, 1.0 otherwise
    pub weight: f64,
    pub ts: DateTime<Utc>,
    /// Algorithm-specific annotations (e.g. a `suspected` flag)
    pub metadata: serde_json::Value,
}

impl Vote {
    pub fn new(proposal_id: u64, agent_id: impl Into<String>, choice: VoteChoice) -> Self {
        Self {
            proposal_id,
            agent_id: agent_id.into(),
            choice,
            weight: 1.0,
            ts: Utc::now(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A decision request being collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Registry-assigned monotonic id
    pub proposal_id: u64,
    /// JSON-serializable proposal content
    pub data: serde_json::Value,
    /// Agents expected to vote
    pub participants: Vec<String>,
    /// Algorithm name this proposal resolves under
    pub algorithm: String,
    /// Decision threshold as understood by that algorithm
    pub threshold: f64,
    /// Wall-clock budget for collection
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusDecision {
    Approved,
    Rejected,
    Timeout,
}

impl ConsensusDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

/// Immutable result returned to the consensus caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub decision: ConsensusDecision,
    pub votes_for: u32,
    pub votes_against: u32,
    pub votes_abstain: u32,
    pub threshold: f64,
    pub participants: Vec<String>,
    pub algorithm_used: String,
    pub duration_ms: u64,
    /// Algorithm-specific fields: Raft adds `{term, commit_index, leader}`,
    /// Byzantine adds `{suspected_agents}`; `persisted: false` marks a
    /// result whose archival write failed.
    pub metadata: serde_json::Value,
}

impl ConsensusResult {
    /// Tally `votes` into a result skeleton with the given decision.
    pub fn tallied(
        decision: ConsensusDecision,
        votes: &[Vote],
        threshold: f64,
        participants: Vec<String>,
        algorithm_used: impl Into<String>,
    ) -> Self {
        let mut votes_for = 0;
        let mut votes_against = 0;
        let mut votes_abstain = 0;
        for vote in votes {
            match vote.choice {
                VoteChoice::For => votes_for += 1,
                VoteChoice::Against => votes_against += 1,
                VoteChoice::Abstain => votes_abstain += 1,
            }
        }
        Self {
            decision,
            votes_for,
            votes_against,
            votes_abstain,
            threshold,
            participants,
            algorithm_used: algorithm_used.into(),
            duration_ms: 0,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach or overwrite one metadata key.
    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value);
        }
        self
    }
}
