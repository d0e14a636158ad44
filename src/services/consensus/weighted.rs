//! Weighted voting consensus.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::ConsensusAlgorithm;
use crate::domain::error::CoordinationResult;
use crate::domain::models::proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote, VoteChoice,
};

/// Threshold over a weighted participant set.
///
/// Approval requires `Σ w(FOR voters) / Σ w(participants) >= threshold`.
/// Weights come from the configured table; an unconfigured agent falls back
/// to the weight carried on its vote (default 1.0).
pub struct WeightedAlgorithm {
    threshold: f64,
    weights: RwLock<HashMap<String, f64>>,
}

impl WeightedAlgorithm {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            weights: RwLock::new(HashMap::new()),
        }
    }

    /// Assign a voting weight to one agent.
    pub async fn set_weight(&self, agent_id: &str, weight: f64) {
        self.weights
            .write()
            .await
            .insert(agent_id.to_string(), weight.max(0.0));
    }

    async fn weight_of(&self, agent_id: &str, vote_weight: Option<f64>) -> f64 {
        if let Some(&w) = self.weights.read().await.get(agent_id) {
            return w;
        }
        vote_weight.unwrap_or(1.0).max(0.0)
    }
}

impl Default for WeightedAlgorithm {
    fn default() -> Self {
        Self::new(0.6)
    }
}

#[async_trait]
impl ConsensusAlgorithm for WeightedAlgorithm {
    fn name(&self) -> &str {
        "weighted"
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
        let vote_weights: HashMap<&str, f64> =
            votes.iter().map(|v| (v.agent_id.as_str(), v.weight)).collect();

        let mut total_weight = 0.0;
        for participant in &proposal.participants {
            total_weight += self
                .weight_of(participant, vote_weights.get(participant.as_str()).copied())
                .await;
        }

        let mut for_weight = 0.0;
        for vote in votes.iter().filter(|v| v.choice == VoteChoice::For) {
            for_weight += self.weight_of(&vote.agent_id, Some(vote.weight)).await;
        }

        let ratio = if total_weight > 0.0 {
            for_weight / total_weight
        } else {
            0.0
        };

        let decision = if ratio >= self.threshold {
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
        )
        .with_meta("for_weight", serde_json::json!(for_weight))
        .with_meta("total_weight", serde_json::json!(total_weight)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn proposal(participants: &[&str]) -> Proposal {
        Proposal {
            proposal_id: 1,
            data: json!({}),
            participants: participants.iter().map(|s| (*s).to_string()).collect(),
            algorithm: "weighted".to_string(),
            threshold: 0.6,
            timeout_ms: 1000,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_heavy_against_vote_rejects() {
        let algorithm = WeightedAlgorithm::new(0.6);
        algorithm.set_weight("a1", 3.0).await;
        algorithm.set_weight("a2", 1.0).await;
        algorithm.set_weight("a3", 1.0).await;

        let votes = vec![
            Vote::new(1, "a1", VoteChoice::Against),
            Vote::new(1, "a2", VoteChoice::For),
            Vote::new(1, "a3", VoteChoice::For),
        ];
        let result = algorithm
            .decide(&proposal(&["a1", "a2", "a3"]), &votes, false)
            .await
            .unwrap();
        // FOR weight 2.0 of 5.0 total = 0.4 < 0.6.
        assert_eq!(result.decision, ConsensusDecision::Rejected);
        assert_eq!(result.metadata["for_weight"], json!(2.0));
        assert_eq!(result.metadata["total_weight"], json!(5.0));
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let algorithm = WeightedAlgorithm::new(0.6);
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For),
            Vote::new(1, "a2", VoteChoice::For),
            Vote::new(1, "a3", VoteChoice::For),
            Vote::new(1, "a4", VoteChoice::Against),
            Vote::new(1, "a5", VoteChoice::Against),
        ];
        // 3 of 5 unit weights = 0.6 exactly.
        let result = algorithm
            .decide(&proposal(&["a1", "a2", "a3", "a4", "a5"]), &votes, false)
            .await
            .unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }

    #[tokio::test]
    async fn test_vote_carried_weight_used_when_unconfigured() {
        let algorithm = WeightedAlgorithm::new(0.6);
        let votes = vec![
            Vote::new(1, "a1", VoteChoice::For).with_weight(4.0),
            Vote::new(1, "a2", VoteChoice::Against),
        ];
        // 4.0 of 5.0 = 0.8 >= 0.6.
        let result = algorithm
            .decide(&proposal(&["a1", "a2"]), &votes, false)
            .await
            .unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
    }

    #[tokio::test]
    async fn test_timeout_below_threshold() {
        let algorithm = WeightedAlgorithm::new(0.6);
        let votes = vec![Vote::new(1, "a1", VoteChoice::For)];
        let result = algorithm
            .decide(&proposal(&["a1", "a2", "a3"]), &votes, true)
            .await
            .unwrap();
        assert_eq!(result.decision, ConsensusDecision::Timeout);
    }
}
