//! End-to-end consensus scenarios across all five algorithms.

use moai_flow::crdt::{Crdt, GCounter};
use moai_flow::domain::error::CoordinationError;
use moai_flow::domain::models::proposal::{ConsensusDecision, VoteChoice};
use moai_flow::services::consensus::{
    ByzantineAlgorithm, ConsensusRegistry, CrdtAlgorithm, QuorumAlgorithm, RaftAlgorithm,
    RaftConfig, WeightedAlgorithm,
};
use moai_flow::services::token_budget::TokenBudget;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Open a proposal on a background task and vote it through.
async fn run_with_votes(
    registry: Arc<ConsensusRegistry>,
    algorithm: &str,
    participants: Vec<&str>,
    votes: Vec<(&str, VoteChoice)>,
    timeout_ms: u64,
) -> moai_flow::domain::models::proposal::ConsensusResult {
    let participant_ids: Vec<String> = participants.iter().map(|s| (*s).to_string()).collect();
    let algorithm = algorithm.to_string();
    let handle = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .request_consensus(
                    json!({"op": "scenario"}),
                    participant_ids,
                    Some(&algorithm),
                    Some(timeout_ms),
                )
                .await
        })
    };

    let proposal_id = loop {
        let ids = registry.active_proposals().await;
        if let Some(&id) = ids.first() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    };
    for (agent, choice) in votes {
        registry
            .record_vote(proposal_id, agent, choice, 1.0, json!({}))
            .await
            .unwrap();
    }
    handle.await.unwrap().unwrap()
}

#[tokio::test]
async fn scenario_quorum_approval() {
    let registry = Arc::new(ConsensusRegistry::new("quorum", 5000, None));
    registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await;

    let result = run_with_votes(
        Arc::clone(&registry),
        "quorum",
        vec!["a1", "a2", "a3"],
        vec![
            ("a1", VoteChoice::For),
            ("a2", VoteChoice::For),
            ("a3", VoteChoice::Against),
        ],
        5000,
    )
    .await;

    assert_eq!(result.decision, ConsensusDecision::Approved);
    assert_eq!(result.votes_for, 2);
    assert_eq!(result.votes_against, 1);
    assert!((result.threshold - 0.5).abs() < f64::EPSILON);
    assert_eq!(result.algorithm_used, "quorum");
}

#[tokio::test]
async fn scenario_weighted_rejection() {
    let registry = Arc::new(ConsensusRegistry::new("weighted", 5000, None));
    let weighted = Arc::new(WeightedAlgorithm::new(0.6));
    weighted.set_weight("a1", 3.0).await;
    weighted.set_weight("a2", 1.0).await;
    weighted.set_weight("a3", 1.0).await;
    registry.register(weighted).await;

    let result = run_with_votes(
        Arc::clone(&registry),
        "weighted",
        vec!["a1", "a2", "a3"],
        vec![
            ("a1", VoteChoice::Against),
            ("a2", VoteChoice::For),
            ("a3", VoteChoice::For),
        ],
        5000,
    )
    .await;

    // Weighted FOR = 2.0 / 5.0 = 0.4 < 0.6.
    assert_eq!(result.decision, ConsensusDecision::Rejected);
}

#[tokio::test]
async fn scenario_raft_commit() {
    let registry = Arc::new(ConsensusRegistry::new("raft", 5000, None));
    registry
        .register(Arc::new(RaftAlgorithm::new(RaftConfig {
            election_timeout_ms: 100,
            heartbeat_interval_ms: 30,
        })))
        .await;

    let participants: Vec<String> = (1..=5).map(|i| format!("r{i}")).collect();
    let result = registry
        .request_consensus(
            json!({"op": "deploy", "v": "2.0"}),
            participants.clone(),
            Some("raft"),
            Some(3000),
        )
        .await
        .unwrap();

    assert_eq!(result.decision, ConsensusDecision::Approved);
    assert_eq!(result.metadata["term"], json!(1));
    assert_eq!(result.metadata["commit_index"], json!(0));
    let leader = result.metadata["leader"].as_str().expect("leader id");
    assert!(participants.iter().any(|p| p == leader));
}

#[tokio::test]
async fn scenario_byzantine_rejection_without_supermajority() {
    let registry = Arc::new(ConsensusRegistry::new("byzantine", 5000, None));
    registry.register(Arc::new(ByzantineAlgorithm::new(1))).await;

    let result = run_with_votes(
        Arc::clone(&registry),
        "byzantine",
        vec!["a1", "a2", "a3", "a4"],
        vec![
            ("a1", VoteChoice::For),
            ("a2", VoteChoice::For),
            ("a3", VoteChoice::Against),
            ("a4", VoteChoice::Against),
        ],
        5000,
    )
    .await;

    // FOR ratio 0.5 is not > 2/3 with n = 4, f = 1.
    assert_eq!(result.decision, ConsensusDecision::Rejected);
}

#[tokio::test]
async fn scenario_crdt_merge_convergence() {
    let mut a = GCounter::new("a1");
    a.increment(100);
    let mut b = GCounter::new("a2");
    b.increment(75);

    let ab = a.merge(&b);
    let ba = b.merge(&a);
    assert_eq!(ab.value(), 175);
    assert_eq!(ba.value(), 175);
    assert_eq!(ab, ba);
    // Merging the result with itself changes nothing.
    assert_eq!(ab.merge(&ab).value(), 175);
}

#[tokio::test]
async fn scenario_token_budget_overflow() {
    let budget = TokenBudget::new(100);
    budget.allocate("a", 60).await.unwrap();

    let err = budget.allocate("b", 50).await.unwrap_err();
    assert!(matches!(err, CoordinationError::BudgetExceeded { .. }));

    // State unchanged: sum of allocations is still 60.
    let snapshot = budget.snapshot().await;
    assert_eq!(snapshot.allocated, 60);
}

#[tokio::test]
async fn scenario_crdt_consensus_supermajority() {
    let registry = Arc::new(ConsensusRegistry::new("crdt", 5000, None));
    registry.register(Arc::new(CrdtAlgorithm::supermajority())).await;

    let result = run_with_votes(
        Arc::clone(&registry),
        "crdt",
        vec!["a1", "a2", "a3", "a4"],
        vec![
            ("a1", VoteChoice::For),
            ("a2", VoteChoice::For),
            ("a3", VoteChoice::Abstain),
            ("a4", VoteChoice::Against),
        ],
        5000,
    )
    .await;

    // Abstention excluded: 2 FOR of 3 expressed = 2/3 >= 2/3.
    assert_eq!(result.decision, ConsensusDecision::Approved);
}

#[tokio::test]
async fn scenario_stats_accumulate_across_algorithms() {
    let registry = Arc::new(ConsensusRegistry::new("quorum", 5000, None));
    registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await;
    registry.register(Arc::new(CrdtAlgorithm::simple_majority())).await;

    let _ = run_with_votes(
        Arc::clone(&registry),
        "quorum",
        vec!["a1", "a2"],
        vec![("a1", VoteChoice::For), ("a2", VoteChoice::For)],
        5000,
    )
    .await;
    let _ = run_with_votes(
        Arc::clone(&registry),
        "crdt",
        vec!["a1", "a2"],
        vec![("a1", VoteChoice::Against), ("a2", VoteChoice::Against)],
        5000,
    )
    .await;

    let stats = registry.stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.by_algorithm.get("quorum"), Some(&1));
    assert_eq!(stats.by_algorithm.get("crdt"), Some(&1));
    assert!((stats.approval_rate - 0.5).abs() < f64::EPSILON);
}
