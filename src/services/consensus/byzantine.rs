//! Byzantine-tolerant majority voting.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use tracing::warn;

use super::ConsensusAlgorithm;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::models::proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote, VoteChoice,
};

/// Supermajority voting tolerant of up to `f` faulty participants.
///
/// Sized for `n >= 3f + 1`: approval requires strictly more than `2n/3` FOR
/// votes, and any outcome requires at least `2f + 1` votes collected.
/// Malformed votes (non-participants, bad weights, repeats of an agent the
/// registry let through) count as AGAINST and their senders are reported in
/// `metadata.suspected_agents`.
pub struct ByzantineAlgorithm {
    /// Maximum faulty participants tolerated
    f: usize,
}

impl ByzantineAlgorithm {
    pub fn new(f: usize) -> Self {
        Self { f }
    }

    /// Smallest participant count this tolerance level supports.
    pub fn min_participants(&self) -> usize {
        3 * self.f + 1
    }

    fn is_malformed(vote: &Vote, participants: &[String], seen: &HashSet<&str>) -> bool {
        !participants.iter().any(|p| p == &vote.agent_id)
            || seen.contains(vote.agent_id.as_str())
            || !vote.weight.is_finite()
            || vote.weight < 0.0
    }
}

impl Default for ByzantineAlgorithm {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ConsensusAlgorithm for ByzantineAlgorithm {
    fn name(&self) -> &str {
        "byzantine"
    }

    fn threshold(&self) -> f64 {
        2.0 / 3.0
    }

    async fn decide(
        &self,
        proposal: &Proposal,
        votes: &[Vote],
        timeout_reached: bool,
    ) -> CoordinationResult<ConsensusResult> {
        let n = proposal.participants.len();
        if n < self.min_participants() {
            return Err(CoordinationError::InvalidArgument(format!(
                "byzantine consensus with f={} needs at least {} participants, got {n}",
                self.f,
                self.min_participants()
            )));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut suspected: Vec<&str> = Vec::new();
        let mut votes_for = 0usize;
        for vote in votes {
            if Self::is_malformed(vote, &proposal.participants, &seen) {
                warn!(agent_id = %vote.agent_id, "suspect vote counted as AGAINST");
                suspected.push(&vote.agent_id);
                continue;
            }
            seen.insert(&vote.agent_id);
            if vote.choice == VoteChoice::For {
                votes_for += 1;
            }
        }

        // Any outcome needs a quorum that at least f+1 honest agents back.
        let decision = if votes.len() < 2 * self.f + 1 {
            ConsensusDecision::Timeout
        } else if 3 * votes_for > 2 * n {
            ConsensusDecision::Approved
        } else if timeout_reached && votes.len() < n {
            ConsensusDecision::Timeout
        } else {
            ConsensusDecision::Rejected
        };

        let mut result = ConsensusResult::tallied(
            decision,
            votes,
            self.threshold(),
            proposal.participants.clone(),
            self.name(),
        )
        .with_meta("f", json!(self.f));
        if !suspected.is_empty() {
            result = result.with_meta("suspected_agents", json!(suspected));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn proposal(n: usize) -> Proposal {
        Proposal {
            proposal_id: 1,
            data: json!({}),
            participants: (1..=n).map(|i| format!("a{i}")).collect(),
            algorithm: "byzantine".to_string(),
            threshold: 2.0 / 3.0,
            timeout_ms: 1000,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_even_split_is_rejected() {
        let algorithm = ByzantineAlgorithm::new(1);
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::For),
            Vote::new(1, "a3", VoteChoice::Against),
            Vote::new(1, "a4", VoteChoice::Against),
        ];
        // FOR ratio 0.5 is not > 2/3.
        let result = algorithm.decide(&proposal(4), &votes, false).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Rejected);
    }

    #[tokio::test]
    async fn test_supermajority_approves() {
        let algorithm = ByzantineAlgorithm::new(1);
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::For),
            Vote::new(1, "a3", VoteChoice::For),
            Vote::new(1, "a4", VoteChoice::Against),
        ];
        // 3 of 4 > 2/3.
        let result = algorithm.decide(&proposal(4), &votes, false).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }

    #[tokio::test]
    async fn test_insufficient_participation_is_timeout() {
        let algorithm = ByzantineAlgorithm::new(1);
        // 2f + 1 = 3 votes required; only 2 arrived.
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::For),
        ];
        let result = algorithm.decide(&proposal(4), &votes, true).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Timeout);
    }

    #[tokio::test]
    async fn test_too_few_participants_is_invalid() {
        let algorithm = ByzantineAlgorithm::new(1);
        let err = algorithm.decide(&proposal(3), &[], false).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_malformed_votes_are_suspected_and_count_against() {
        let algorithm = ByzantineAlgorithm::new(1);
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::For),
            Vote::new(1, "a3", VoteChoice::For),
            // Outsider pretending to participate.
            Vote::new(1, "intruder", VoteChoice::For),
            // Corrupt weight.
            Vote::new(1, "a4", VoteChoice::For).with_weight(f64::NAN),
        ];
        let result = algorithm.decide(&proposal(4), &votes, false).await.unwrap();
        // Valid FOR votes: a1..a3 = 3 of 4 > 2/3.
        assert_eq!(result.decision, ConsensusDecision::Approved);
        assert_eq!(
            result.metadata["suspected_agents"],
            json!(["intruder", "a4"])
        );
    }

    #[tokio::test]
    async fn test_repeat_votes_marked_suspect() {
        let algorithm = ByzantineAlgorithm::new(1);
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::Against),
            Vote::new(1, "a3", VoteChoice::Against),
        ];
        let result = algorithm.decide(&proposal(4), &votes, false).await.unwrap();
        assert_eq!(result.metadata["suspected_agents"], json!(["a1"]));
        assert_eq!(result.decision, ConsensusDecision::Rejected);
    }
}
