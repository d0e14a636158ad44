//! CRDT-backed vote aggregation.
//!
//! Tallies votes into grow-only counters keyed by outcome, so partial
//! tallies from different collection points merge without coordination and
//! converge on the same totals regardless of arrival order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ConsensusAlgorithm;
use crate::crdt::{Crdt, GCounter};
use crate::domain::error::CoordinationResult;
use crate::domain::models::proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote, VoteChoice,
};

/// Convergent per-outcome vote tally.
///
/// One [`GCounter`] per outcome; each voting agent contributes to its own
/// replica entry, so merging two tallies never double-counts a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    fors: GCounter,
    againsts: GCounter,
    abstains: GCounter,
}

impl VoteTally {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            fors: GCounter::new(agent_id.clone()),
            againsts: GCounter::new(agent_id.clone()),
            abstains: GCounter::new(agent_id),
        }
    }

    /// Record one vote cast by the given agent.
    pub fn record(&mut self, agent_id: &str, choice: VoteChoice) {
        // Contribute through a replica owned by the voter, then merge, so
        // the tally stays convergent across aggregation points.
        let mut contribution = Self::new(agent_id);
        match choice {
            VoteChoice::For => contribution.fors.increment(1),
            VoteChoice::Against => contribution.againsts.increment(1),
            VoteChoice::Abstain => contribution.abstains.increment(1),
        }
        *self = self.merge(&contribution);
    }

    pub fn votes_for(&self) -> u64 {
        self.fors.value()
    }

    pub fn votes_against(&self) -> u64 {
        self.againsts.value()
    }

    pub fn votes_abstain(&self) -> u64 {
        self.abstains.value()
    }
}

impl Crdt for VoteTally {
    fn merge(&self, other: &Self) -> Self {
        Self {
            fors: self.fors.merge(&other.fors),
            againsts: self.againsts.merge(&other.againsts),
            abstains: self.abstains.merge(&other.abstains),
        }
    }
}

/// Consensus over a convergent tally.
///
/// Abstentions are excluded from the denominator; approval requires
/// `for / (for + against) >= threshold`. Thresholds in use: simple majority
/// 0.5, supermajority 2/3, unanimous 1.0.
pub struct CrdtAlgorithm {
    threshold: f64,
}

impl CrdtAlgorithm {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn simple_majority() -> Self {
        Self::new(0.5)
    }

    pub fn supermajority() -> Self {
        Self::new(2.0 / 3.0)
    }

    pub fn unanimous() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl ConsensusAlgorithm for CrdtAlgorithm {
    fn name(&self) -> &str {
        "crdt"
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
        let mut tally = VoteTally::new("aggregator");
        for vote in votes {
            tally.record(&vote.agent_id, vote.choice);
        }

        let expressed = tally.votes_for() + tally.votes_against();
        let decision = if expressed == 0 {
            if timeout_reached {
                ConsensusDecision::Timeout
            } else {
                ConsensusDecision::Rejected
            }
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = tally.votes_for() as f64 / expressed as f64;
            if ratio >= self.threshold {
                ConsensusDecision::Approved
            } else {
                ConsensusDecision::Rejected
            }
        };

        Ok(ConsensusResult::tallied(
            decision,
            votes,
            self.threshold,
            proposal.participants.clone(),
            self.name(),
        )
        .with_meta("expressed", json!(expressed)))
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
            algorithm: "crdt".to_string(),
            threshold: 0.5,
            timeout_ms: 1000,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tally_counts_by_outcome() {
        let mut tally = VoteTally::new("aggregator");
        tally.record("a1", VoteChoice::For);
        tally.record("a2", VoteChoice::For);
        tally.record("a3", VoteChoice::Against);
        tally.record("a4", VoteChoice::Abstain);
        assert_eq!(tally.votes_for(), 2);
        assert_eq!(tally.votes_against(), 1);
        assert_eq!(tally.votes_abstain(), 1);
    }

    #[test]
    fn test_tally_merge_does_not_double_count() {
        let mut left = VoteTally::new("left");
        left.record("a1", VoteChoice::For);
        left.record("a2", VoteChoice::For);

        let mut right = VoteTally::new("right");
        right.record("a1", VoteChoice::For); // same vote observed elsewhere
        right.record("a3", VoteChoice::Against);

        let merged = left.merge(&right);
        assert_eq!(merged.votes_for(), 2);
        assert_eq!(merged.votes_against(), 1);
        assert_eq!(left.merge(&right), right.merge(&left));
        assert_eq!(merged.merge(&merged), merged);
    }

    #[tokio::test]
    async fn test_abstentions_excluded_from_denominator() {
        let algorithm = CrdtAlgorithm::simple_majority();
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::Abstain),
            Vote::new(1, "a3", VoteChoice::Abstain),
        ];
        // 1 FOR of 1 expressed = 1.0 >= 0.5.
        let result = algorithm.decide(&proposal(3), &votes, false).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }

    #[tokio::test]
    async fn test_unanimous_threshold() {
        let algorithm = CrdtAlgorithm::unanimous();
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::For),
            Vote::new(1, "a3", VoteChoice::Against),
        ];
        let result = algorithm.decide(&proposal(3), &votes, false).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Rejected);
    }

    #[tokio::test]
    async fn test_no_expressed_votes_times_out_after_deadline() {
        let algorithm = CrdtAlgorithm::supermajority();
        let votes = vec![Vote::new(1, "a1", VoteChoice::Abstain)];
        let result = algorithm.decide(&proposal(3), &votes, true).await.unwrap();
        assert_eq!(result.decision, ConsensusDecision::Timeout);
    }
}
