//! Broadcast message envelope.
//!
//! Recipients are determined entirely by the topology manager; the envelope
//! itself carries no routing information beyond the sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Solicits votes for an open proposal
    ConsensusRequest,
    /// Liveness signal
    Heartbeat,
    /// Opaque application payload
    App,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsensusRequest => "consensus_request",
            Self::Heartbeat => "heartbeat",
            Self::App => "app",
        }
    }
}

/// A message as delivered to topology neighbours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Sending agent
    pub from: String,
    pub ts: DateTime<Utc>,
    /// Payload for `App` messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl BroadcastMessage {
    /// An application payload message.
    pub fn app(from: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::App,
            proposal_id: None,
            proposal: None,
            algorithm: None,
            timeout_ms: None,
            from: from.into(),
            ts: Utc::now(),
            payload: Some(payload),
        }
    }

    /// A heartbeat from `from`.
    pub fn heartbeat(from: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            proposal_id: None,
            proposal: None,
            algorithm: None,
            timeout_ms: None,
            from: from.into(),
            ts: Utc::now(),
            payload: None,
        }
    }

    /// A vote solicitation for an open proposal.
    pub fn consensus_request(
        from: impl Into<String>,
        proposal_id: u64,
        proposal: serde_json::Value,
        algorithm: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            kind: MessageKind::ConsensusRequest,
            proposal_id: Some(proposal_id),
            proposal: Some(proposal),
            algorithm: Some(algorithm.into()),
            timeout_ms: Some(timeout_ms),
            from: from.into(),
            ts: Utc::now(),
            payload: None,
        }
    }
}
