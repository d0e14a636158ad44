//! Consensus subsystem.
//!
//! A registry of interchangeable decision algorithms. Proposals enter
//! through [`ConsensusRegistry::request_consensus`], collect votes recorded
//! via [`ConsensusRegistry::record_vote`], and resolve to a
//! [`ConsensusResult`] when every participant has voted or the deadline
//! passes. Algorithms that drive their own machinery (Raft) opt out of vote
//! collection and decide as soon as the proposal opens.

pub mod byzantine;
pub mod crdt_vote;
pub mod quorum;
pub mod raft;
pub mod weighted;

pub use byzantine::ByzantineAlgorithm;
pub use crdt_vote::{CrdtAlgorithm, VoteTally};
pub use quorum::QuorumAlgorithm;
pub use raft::{RaftAlgorithm, RaftCluster, RaftConfig, RaftLogEntry, RaftOutcome, RaftRole};
pub use weighted::WeightedAlgorithm;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::models::event::{EventKind, SwarmEvent};
use crate::domain::models::proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote, VoteChoice,
};
use crate::infrastructure::database::SwarmMemory;

// ============================================================================
// Algorithm contract
// ============================================================================

/// A pluggable consensus algorithm.
///
/// Implementations never error for "the decision was no": rejection and
/// timeout are ordinary [`ConsensusResult`]s. Errors are reserved for
/// malformed input.
#[async_trait]
pub trait ConsensusAlgorithm: Send + Sync {
    /// Registry name of this algorithm.
    fn name(&self) -> &str;

    /// Decision threshold this algorithm applies, echoed into results.
    fn threshold(&self) -> f64;

    /// Whether the registry should collect votes before deciding.
    /// Algorithms that replicate internally return false and decide
    /// immediately after the proposal opens.
    fn collects_votes(&self) -> bool {
        true
    }

    /// Resolve the proposal from the collected votes.
    ///
    /// `timeout_reached` is true when the deadline passed before full
    /// participation; the decision must then be made from the votes so far.
    async fn decide(
        &self,
        proposal: &Proposal,
        votes: &[Vote],
        timeout_reached: bool,
    ) -> CoordinationResult<ConsensusResult>;
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate consensus statistics.
#[derive(Debug, Clone, Default)]
pub struct ConsensusStats {
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
    pub timeout: u64,
    pub duplicates_rejected: u64,
    pub by_algorithm: HashMap<String, u64>,
    pub avg_duration_ms: f64,
    /// `approved / total`, 0.0 before any proposal resolves
    pub approval_rate: f64,
}

#[derive(Default)]
struct StatsInner {
    total: u64,
    approved: u64,
    rejected: u64,
    timeout: u64,
    duplicates_rejected: u64,
    by_algorithm: HashMap<String, u64>,
    total_duration_ms: u64,
}

// ============================================================================
// Registry
// ============================================================================

struct ActiveProposal {
    proposal: Proposal,
    votes: Vec<Vote>,
    voters: HashSet<String>,
    vote_arrived: Arc<Notify>,
}

/// Holds named algorithms and runs the proposal lifecycle.
pub struct ConsensusRegistry {
    algorithms: RwLock<HashMap<String, Arc<dyn ConsensusAlgorithm>>>,
    default_algorithm: String,
    default_timeout_ms: u64,
    next_proposal_id: AtomicU64,
    active: Mutex<HashMap<u64, ActiveProposal>>,
    stats: Mutex<StatsInner>,
    /// Archive sink; `None` keeps the registry purely in-memory (tests)
    memory: Option<Arc<SwarmMemory>>,
}

impl ConsensusRegistry {
    pub fn new(
        default_algorithm: impl Into<String>,
        default_timeout_ms: u64,
        memory: Option<Arc<SwarmMemory>>,
    ) -> Self {
        Self {
            algorithms: RwLock::new(HashMap::new()),
            default_algorithm: default_algorithm.into(),
            default_timeout_ms,
            next_proposal_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            stats: Mutex::new(StatsInner::default()),
            memory,
        }
    }

    /// Register an algorithm under its name. Returns false (and leaves the
    /// existing entry untouched) when the name is already taken.
    pub async fn register(&self, algorithm: Arc<dyn ConsensusAlgorithm>) -> bool {
        let mut algorithms = self.algorithms.write().await;
        let name = algorithm.name().to_string();
        if algorithms.contains_key(&name) {
            warn!(name, "duplicate algorithm registration rejected");
            return false;
        }
        algorithms.insert(name, algorithm);
        true
    }

    /// Names of all registered algorithms.
    pub async fn algorithm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.algorithms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a proposal through to a decision.
    ///
    /// Blocks until every participant has voted, the algorithm resolves
    /// internally, or `timeout_ms` elapses, whichever comes first.
    #[instrument(skip(self, data, participants), fields(algorithm))]
    pub async fn request_consensus(
        &self,
        data: serde_json::Value,
        participants: Vec<String>,
        algorithm: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> CoordinationResult<ConsensusResult> {
        if participants.is_empty() {
            return Err(CoordinationError::InvalidArgument(
                "consensus requires at least one participant".to_string(),
            ));
        }

        let name = algorithm.unwrap_or(&self.default_algorithm).to_string();
        let algorithm = {
            let algorithms = self.algorithms.read().await;
            algorithms
                .get(&name)
                .cloned()
                .ok_or_else(|| CoordinationError::NotFound(format!("algorithm {name}")))?
        };

        let timeout_ms = timeout_ms.unwrap_or(self.default_timeout_ms);
        let proposal_id = self.next_proposal_id.fetch_add(1, Ordering::SeqCst);
        let proposal = Proposal {
            proposal_id,
            data,
            participants: participants.clone(),
            algorithm: name.clone(),
            threshold: algorithm.threshold(),
            timeout_ms,
            created_at: Utc::now(),
        };
        let vote_arrived = Arc::new(Notify::new());
        {
            let mut active = self.active.lock().await;
            active.insert(
                proposal_id,
                ActiveProposal {
                    proposal: proposal.clone(),
                    votes: Vec::new(),
                    voters: HashSet::new(),
                    vote_arrived: Arc::clone(&vote_arrived),
                },
            );
        }
        self.archive_event(
            EventKind::ProposalCreated,
            json!({
                "proposal_id": proposal_id,
                "algorithm": name,
                "participants": participants,
            }),
        )
        .await;
        info!(proposal_id, algorithm = %name, "proposal opened");

        let started = Instant::now();
        let mut result = if algorithm.collects_votes() {
            self.collect_and_decide(&proposal, algorithm.as_ref(), started)
                .await?
        } else {
            algorithm.decide(&proposal, &[], false).await?
        };
        #[allow(clippy::cast_possible_truncation)]
        {
            result.duration_ms = started.elapsed().as_millis() as u64;
        }

        // The proposal leaves the active map only once decided.
        let collected = {
            let mut active = self.active.lock().await;
            active.remove(&proposal_id)
        };
        if result.decision == ConsensusDecision::Timeout {
            if let Some(entry) = &collected {
                // Attach partial vote data so callers can see who voted.
                let voters: Vec<&str> =
                    entry.votes.iter().map(|v| v.agent_id.as_str()).collect();
                result = result.with_meta("partial_voters", json!(voters));
            }
        }

        self.record_outcome(&name, &result).await;
        self.archive_result(proposal_id, &mut result).await;
        Ok(result)
    }

    async fn collect_and_decide(
        &self,
        proposal: &Proposal,
        algorithm: &dyn ConsensusAlgorithm,
        started: Instant,
    ) -> CoordinationResult<ConsensusResult> {
        let deadline = started + Duration::from_millis(proposal.timeout_ms);
        loop {
            let (votes, complete, waiter) = {
                let active = self.active.lock().await;
                let entry = active.get(&proposal.proposal_id).ok_or_else(|| {
                    CoordinationError::NotFound(format!("proposal {}", proposal.proposal_id))
                })?;
                (
                    entry.votes.clone(),
                    entry.voters.len() == proposal.participants.len(),
                    Arc::clone(&entry.vote_arrived),
                )
            };

            if complete {
                return algorithm.decide(proposal, &votes, false).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return algorithm.decide(proposal, &votes, true).await;
            }
            // A permit stored by a vote that raced the check above makes
            // this return immediately; no wakeup is ever lost.
            if tokio::time::timeout(remaining, waiter.notified()).await.is_err() {
                let votes = {
                    let active = self.active.lock().await;
                    active
                        .get(&proposal.proposal_id)
                        .map(|e| e.votes.clone())
                        .unwrap_or_default()
                };
                return algorithm.decide(proposal, &votes, true).await;
            }
        }
    }

    /// Record one agent's vote on an open proposal.
    ///
    /// Returns whether the vote was accepted. Duplicates and votes from
    /// non-participants are rejected (false) but never error; an unknown
    /// proposal errors with `NotFound`.
    pub async fn record_vote(
        &self,
        proposal_id: u64,
        agent_id: &str,
        choice: VoteChoice,
        weight: f64,
        metadata: serde_json::Value,
    ) -> CoordinationResult<bool> {
        let accepted = {
            let mut active = self.active.lock().await;
            let entry = active
                .get_mut(&proposal_id)
                .ok_or_else(|| CoordinationError::NotFound(format!("proposal {proposal_id}")))?;

            if !entry.proposal.participants.iter().any(|p| p == agent_id) {
                warn!(proposal_id, agent_id, "vote from non-participant rejected");
                false
            } else if entry.voters.contains(agent_id) {
                warn!(proposal_id, agent_id, "duplicate vote rejected");
                false
            } else {
                entry.voters.insert(agent_id.to_string());
                entry.votes.push(
                    Vote::new(proposal_id, agent_id, choice)
                        .with_weight(weight)
                        .with_metadata(metadata),
                );
                entry.vote_arrived.notify_one();
                true
            }
        };

        if accepted {
            self.archive_event(
                EventKind::VoteRecorded,
                json!({
                    "proposal_id": proposal_id,
                    "agent_id": agent_id,
                    "vote": choice.as_str(),
                }),
            )
            .await;
        } else {
            let mut stats = self.stats.lock().await;
            stats.duplicates_rejected += 1;
        }
        Ok(accepted)
    }

    /// Ids of currently open proposals.
    pub async fn active_proposals(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.active.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Aggregate statistics across resolved proposals.
    pub async fn stats(&self) -> ConsensusStats {
        let stats = self.stats.lock().await;
        #[allow(clippy::cast_precision_loss)]
        let (avg, rate) = if stats.total > 0 {
            (
                stats.total_duration_ms as f64 / stats.total as f64,
                stats.approved as f64 / stats.total as f64,
            )
        } else {
            (0.0, 0.0)
        };
        ConsensusStats {
            total: stats.total,
            approved: stats.approved,
            rejected: stats.rejected,
            timeout: stats.timeout,
            duplicates_rejected: stats.duplicates_rejected,
            by_algorithm: stats.by_algorithm.clone(),
            avg_duration_ms: avg,
            approval_rate: rate,
        }
    }

    async fn record_outcome(&self, algorithm: &str, result: &ConsensusResult) {
        let mut stats = self.stats.lock().await;
        stats.total += 1;
        match result.decision {
            ConsensusDecision::Approved => stats.approved += 1,
            ConsensusDecision::Rejected => stats.rejected += 1,
            ConsensusDecision::Timeout => stats.timeout += 1,
        }
        *stats.by_algorithm.entry(algorithm.to_string()).or_insert(0) += 1;
        stats.total_duration_ms += result.duration_ms;
    }

    /// Archive the decision; on storage failure the result is still returned
    /// with `metadata.persisted = false`.
    async fn archive_result(&self, proposal_id: u64, result: &mut ConsensusResult) {
        let Some(memory) = &self.memory else {
            return;
        };
        let archived = memory.log_proposal(proposal_id, result).await;
        let event = SwarmEvent::new(
            EventKind::ProposalDecided,
            None,
            json!({
                "proposal_id": proposal_id,
                "decision": result.decision.as_str(),
                "algorithm": result.algorithm_used,
            }),
        );
        let event_written = memory.insert_event(&event).await;
        if archived.is_err() || event_written.is_err() {
            warn!(proposal_id, "failed to archive consensus result");
            if let serde_json::Value::Object(map) = &mut result.metadata {
                map.insert("persisted".to_string(), json!(false));
            }
        }
    }

    async fn archive_event(&self, kind: EventKind, payload: serde_json::Value) {
        if let Some(memory) = &self.memory {
            let event = SwarmEvent::new(kind, None, payload);
            if let Err(e) = memory.insert_event(&event).await {
                debug!(error = %e, "event archive failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConsensusRegistry {
        ConsensusRegistry::new("quorum", 200, None)
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = registry();
        assert!(registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await);
        assert!(!registry.register(Arc::new(QuorumAlgorithm::new(0.7))).await);
        assert_eq!(registry.algorithm_names().await, vec!["quorum".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_participants_rejected() {
        let registry = registry();
        registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await;
        let err = registry
            .request_consensus(json!({}), vec![], None, Some(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unknown_algorithm_is_not_found() {
        let registry = registry();
        let err = registry
            .request_consensus(json!({}), vec!["a1".into()], Some("paxos"), Some(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_vote_on_unknown_proposal_is_not_found() {
        let registry = registry();
        let err = registry
            .record_vote(99, "a1", VoteChoice::For, 1.0, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_full_participation_resolves_before_timeout() {
        let registry = Arc::new(registry());
        registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await;

        let handle = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .request_consensus(
                        json!({"op": "deploy"}),
                        vec!["a1".into(), "a2".into(), "a3".into()],
                        None,
                        Some(10_000),
                    )
                    .await
            })
        };

        // Wait for the proposal to open, then vote.
        let proposal_id = loop {
            let ids = registry.active_proposals().await;
            if let Some(&id) = ids.first() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        for agent in ["a1", "a2", "a3"] {
            assert!(registry
                .record_vote(proposal_id, agent, VoteChoice::For, 1.0, json!({}))
                .await
                .unwrap());
        }

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.decision, ConsensusDecision::Approved);
        assert_eq!(result.votes_for, 3);

        let stats = registry.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.approved, 1);
        assert!((stats.approval_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_duplicate_vote_rejected_and_counted() {
        let registry = Arc::new(registry());
        registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await;

        let handle = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .request_consensus(json!({}), vec!["a1".into(), "a2".into()], None, Some(150))
                    .await
            })
        };

        let proposal_id = loop {
            let ids = registry.active_proposals().await;
            if let Some(&id) = ids.first() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(registry
            .record_vote(proposal_id, "a1", VoteChoice::For, 1.0, json!({}))
            .await
            .unwrap());
        // Second vote by the same agent is rejected; the first stands.
        assert!(!registry
            .record_vote(proposal_id, "a1", VoteChoice::Against, 1.0, json!({}))
            .await
            .unwrap());

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.votes_for, 1);
        assert_eq!(result.votes_against, 0);
        assert_eq!(registry.stats().await.duplicates_rejected, 1);
    }

    #[tokio::test]
    async fn test_timeout_result_carries_partial_voters() {
        let registry = Arc::new(registry());
        registry.register(Arc::new(QuorumAlgorithm::new(0.5))).await;

        let handle = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .request_consensus(
                        json!({}),
                        vec!["a1".into(), "a2".into(), "a3".into(), "a4".into()],
                        None,
                        Some(100),
                    )
                    .await
            })
        };

        let proposal_id = loop {
            let ids = registry.active_proposals().await;
            if let Some(&id) = ids.first() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        registry
            .record_vote(proposal_id, "a1", VoteChoice::For, 1.0, json!({}))
            .await
            .unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.decision, ConsensusDecision::Timeout);
        assert_eq!(result.metadata["partial_voters"], json!(["a1"]));
        assert!(registry.active_proposals().await.is_empty());
    }
}
