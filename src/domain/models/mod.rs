//! Domain models for the swarm coordination core.

pub mod agent;
pub mod config;
pub mod event;
pub mod message;
pub mod pattern;
pub mod proposal;

pub use agent::{AgentRecord, AgentState};
pub use config::{SwarmConfig, TopologyKind};
pub use event::{EventKind, SwarmEvent};
pub use message::{BroadcastMessage, MessageKind};
pub use pattern::{PatternKind, PatternRecord};
pub use proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote, VoteChoice,
};
