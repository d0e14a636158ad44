//! Simple majority consensus.

use async_trait::async_trait;

use super::ConsensusAlgorithm;
use crate::domain::error::CoordinationResult;
use crate::domain::models::proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote, VoteChoice,
};

/// Strict-majority quorum over the participant set.
///
/// Approval requires `votes_for / |participants| > threshold`, strictly.
/// Non-voters and abstentions count against approval through the
/// denominator.
pub struct QuorumAlgorithm {
    threshold: f64,
}

impl QuorumAlgorithm {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for QuorumAlgorithm {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[async_trait]
impl ConsensusAlgorithm for QuorumAlgorithm {
    fn name(&self) -> &str {
        "quorum"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn decide(
        &self,
        proposal: &Proposal,
        votes: &[Vote],
        timeout_reached: bool,
    ) -> CoordinationResult<ConsensusResult> {
        let votes_for = votes.iter().filter(|v| v.choice == VoteChoice::For).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = votes_for as f64 / proposal.participants.len() as f64;

        let decision = if ratio > self.threshold {
            // The threshold can be met from partial votes; a timeout does
            // not undo an already-sufficient majority.
            ConsensusDecision::Approved
        } else if timeout_reached {
            ConsensusDecision::Timeout
        } else {
            ConsensusDecision::Rejected
        };

        Ok(ConsensusResult::tallied(
            decision,
            votes,
            self.threshold,
            proposal.participants.clone(),
            self.name(),
        ))
    }
}
