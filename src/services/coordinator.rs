//! Swarm coordinator façade.
//!
//! Composes the lifecycle, topology, consensus, budget, memory, pattern,
//! and hook subsystems behind the agent-facing operations. The topology
//! kind is fixed at construction; shared state stays partitioned per
//! subsystem and the coordinator never holds two subsystem locks at once.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::models::agent::AgentRecord;
use crate::domain::models::config::SwarmConfig;
use crate::domain::models::event::{EventKind, SwarmEvent};
use crate::domain::models::message::BroadcastMessage;
use crate::domain::models::proposal::{ConsensusResult, VoteChoice};
use crate::infrastructure::database::SwarmMemory;

use super::consensus::{
    ByzantineAlgorithm, ConsensusRegistry, ConsensusStats, CrdtAlgorithm, QuorumAlgorithm,
    RaftAlgorithm, RaftConfig, WeightedAlgorithm,
};
use super::hooks::{HookContext, HookOutcome, HookRegistry, PatternHook};
use super::lifecycle::AgentLifecycle;
use super::pattern_collector::{PatternCollector, PatternStatistics};
use super::token_budget::{BudgetSnapshot, TokenBudget};
use super::topology::{TopologyInfo, TopologyManager};

/// Top-level coordination entry point for one swarm.
pub struct SwarmCoordinator {
    config: SwarmConfig,
    memory: Arc<SwarmMemory>,
    lifecycle: AgentLifecycle,
    topology: TopologyManager,
    consensus: ConsensusRegistry,
    budget: TokenBudget,
    patterns: Arc<PatternCollector>,
    hooks: HookRegistry,
}

impl SwarmCoordinator {
    /// Build a coordinator with durable state under `config.storage_root`.
    pub async fn new(config: SwarmConfig) -> CoordinationResult<Self> {
        let memory = SwarmMemory::open(&config.storage_root, &config.database).await?;
        Self::with_memory(config, memory).await
    }

    /// Build a coordinator over an existing memory handle (shared stores,
    /// in-memory databases in tests).
    pub async fn with_memory(
        config: SwarmConfig,
        memory: Arc<SwarmMemory>,
    ) -> CoordinationResult<Self> {
        // Agents missing 3 heartbeat intervals are reported by health scans.
        let failure_threshold_ms = config.heartbeat_interval_ms * 3;
        let lifecycle =
            AgentLifecycle::new(Arc::clone(&memory), config.max_agents, failure_threshold_ms);
        let topology = TopologyManager::new(config.topology);

        let consensus = ConsensusRegistry::new(
            config.default_algorithm.clone(),
            config.consensus_timeout_ms,
            Some(Arc::clone(&memory)),
        );
        consensus
            .register(Arc::new(QuorumAlgorithm::new(config.quorum_threshold)))
            .await;
        consensus
            .register(Arc::new(WeightedAlgorithm::new(config.weighted_threshold)))
            .await;
        consensus
            .register(Arc::new(ByzantineAlgorithm::new(config.byzantine_f)))
            .await;
        consensus
            .register(Arc::new(RaftAlgorithm::new(RaftConfig {
                election_timeout_ms: config.election_timeout_ms,
                heartbeat_interval_ms: config.heartbeat_interval_ms,
            })))
            .await;
        consensus
            .register(Arc::new(CrdtAlgorithm::simple_majority()))
            .await;

        let budget = TokenBudget::new(config.total_token_budget);
        let patterns = Arc::new(PatternCollector::new(config.patterns_root()));
        let hooks = HookRegistry::new(config.hook_timeout_ms);
        hooks
            .register(Arc::new(PatternHook::new(Arc::clone(&patterns))))
            .await;

        info!(
            topology = config.topology.as_str(),
            max_agents = config.max_agents,
            "swarm coordinator ready"
        );
        Ok(Self {
            config,
            memory,
            lifecycle,
            topology,
            consensus,
            budget,
            patterns,
            hooks,
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Register an agent and hand back its broadcast inbox.
    #[instrument(skip(self, metadata))]
    pub async fn register_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        metadata: serde_json::Value,
    ) -> CoordinationResult<mpsc::UnboundedReceiver<BroadcastMessage>> {
        self.lifecycle.register(agent_id, agent_type, metadata).await?;
        match self.topology.add_member(agent_id).await {
            Ok(inbox) => Ok(inbox),
            Err(e) => {
                // Keep registry and topology membership consistent.
                let _ = self.lifecycle.mark_failed(agent_id, "topology join failed").await;
                Err(e)
            }
        }
    }

    /// Spawn an agent with a generated id.
    pub async fn spawn_agent(
        &self,
        agent_type: &str,
        metadata: serde_json::Value,
    ) -> CoordinationResult<(String, mpsc::UnboundedReceiver<BroadcastMessage>)> {
        let agent_id = self.lifecycle.spawn(agent_type, metadata).await?;
        let inbox = self.topology.add_member(&agent_id).await?;
        Ok((agent_id, inbox))
    }

    /// Retire an agent: terminate it, drop it from the topology, release
    /// its token allocation.
    pub async fn deregister_agent(&self, agent_id: &str, duration_ms: u64) -> CoordinationResult<()> {
        self.lifecycle.terminate(agent_id, duration_ms).await?;
        self.topology.remove_member(agent_id).await?;
        let released = self.budget.release(agent_id).await;
        if released > 0 {
            info!(agent_id, released, "released token allocation");
        }
        Ok(())
    }

    /// Record a heartbeat for an agent.
    pub async fn heartbeat(&self, agent_id: &str) -> CoordinationResult<()> {
        self.lifecycle.heartbeat(agent_id).await
    }

    /// Live agents whose heartbeat is stale at `now`.
    pub async fn health_scan(&self, now: DateTime<Utc>) -> Vec<String> {
        self.lifecycle.health_scan(now).await
    }

    /// Declare an agent failed (typically after a health scan).
    pub async fn mark_failed(&self, agent_id: &str, reason: &str) -> CoordinationResult<()> {
        self.lifecycle.mark_failed(agent_id, reason).await?;
        self.topology.remove_member(agent_id).await?;
        Ok(())
    }

    /// Snapshot of one agent's registry record.
    pub async fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.lifecycle.get(agent_id).await
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    /// Broadcast an application payload from `from_agent` along the
    /// topology. Returns the number of recipients reached.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        payload: serde_json::Value,
        exclude: &[String],
    ) -> CoordinationResult<usize> {
        let message = BroadcastMessage::app(from_agent, payload);
        let delivered = self.topology.broadcast(from_agent, &message, exclude).await?;
        let event = SwarmEvent::new(
            EventKind::BroadcastSent,
            Some(from_agent.to_string()),
            json!({ "delivered": delivered }),
        );
        self.memory.insert_event(&event).await?;
        Ok(delivered)
    }

    /// Current topology shape.
    pub async fn get_topology_info(&self) -> TopologyInfo {
        self.topology.get_topology_info().await
    }

    // -------------------------------------------------------------------------
    // Consensus
    // -------------------------------------------------------------------------

    /// Open a proposal and block until it resolves.
    ///
    /// Participants default to all live members. Every participant receives
    /// a `consensus_request` envelope before vote collection starts.
    #[instrument(skip(self, data, participants))]
    pub async fn request_consensus(
        &self,
        data: serde_json::Value,
        participants: Option<Vec<String>>,
        algorithm: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> CoordinationResult<ConsensusResult> {
        let participants = match participants {
            Some(p) => p,
            None => self.lifecycle.live_members().await,
        };
        if participants.is_empty() {
            return Err(CoordinationError::InvalidArgument(
                "no live members to form a participant set".to_string(),
            ));
        }

        // Solicit votes first so agents can respond while we wait.
        let algorithm_name = algorithm.unwrap_or(&self.config.default_algorithm);
        let timeout = timeout_ms.unwrap_or(self.config.consensus_timeout_ms);
        let solicitation = BroadcastMessage::consensus_request(
            "coordinator",
            0, // the registry assigns the real id; agents correlate via payload
            data.clone(),
            algorithm_name,
            timeout,
        );
        for participant in &participants {
            // Best-effort: a missing inbox just means that agent won't vote.
            let _ = self.topology.send_to(participant, &solicitation).await;
        }

        self.consensus
            .request_consensus(data, participants, algorithm, timeout_ms)
            .await
    }

    /// Record one agent's vote on an open proposal.
    pub async fn record_vote(
        &self,
        proposal_id: u64,
        agent_id: &str,
        choice: VoteChoice,
        weight: f64,
        metadata: serde_json::Value,
    ) -> CoordinationResult<bool> {
        self.consensus
            .record_vote(proposal_id, agent_id, choice, weight, metadata)
            .await
    }

    /// Ids of proposals currently collecting votes.
    pub async fn active_proposals(&self) -> Vec<u64> {
        self.consensus.active_proposals().await
    }

    pub async fn consensus_stats(&self) -> ConsensusStats {
        self.consensus.stats().await
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    pub async fn allocate_tokens(&self, agent_id: &str, amount: u64) -> CoordinationResult<()> {
        self.budget.allocate(agent_id, amount).await
    }

    pub async fn consume_tokens(&self, agent_id: &str, amount: u64) -> CoordinationResult<()> {
        self.budget.consume(agent_id, amount).await
    }

    pub async fn refund_tokens(&self, agent_id: &str, amount: u64) {
        self.budget.refund(agent_id, amount).await;
    }

    pub async fn rebalance_tokens(
        &self,
        new_allocations: HashMap<String, u64>,
    ) -> CoordinationResult<()> {
        self.budget.rebalance(new_allocations).await
    }

    pub async fn remaining_tokens(&self, agent_id: &str) -> u64 {
        self.budget.remaining(agent_id).await
    }

    pub async fn budget_snapshot(&self) -> BudgetSnapshot {
        self.budget.snapshot().await
    }

    // -------------------------------------------------------------------------
    // Observations and hooks
    // -------------------------------------------------------------------------

    /// Run post-task hooks for a finished task. Chooses the `Post` or
    /// `Error` phase from `context.phase`; never fails the caller.
    pub async fn run_task_hooks(&self, context: &HookContext) -> Vec<HookOutcome> {
        self.hooks.run_phase(context).await
    }

    /// Register an additional lifecycle hook.
    pub async fn register_hook(&self, hook: Arc<dyn super::hooks::SwarmHook>) -> bool {
        self.hooks.register(hook).await
    }

    pub fn patterns(&self) -> &Arc<PatternCollector> {
        &self.patterns
    }

    pub fn pattern_statistics(&self) -> PatternStatistics {
        self.patterns.get_statistics()
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Durable memory handle backing this swarm.
    pub fn memory(&self) -> &Arc<SwarmMemory> {
        &self.memory
    }

    /// Apply the configured retention policies. Returns
    /// `(events_pruned, pattern_shards_pruned)`.
    pub async fn apply_retention(&self) -> CoordinationResult<(u64, u64)> {
        let events = self
            .memory
            .cleanup_old_events(self.config.event_retention_days)
            .await?;
        let patterns = self.patterns.prune_older_than(self.config.pattern_retention_days);
        Ok((events, patterns))
    }

    /// Close the durable store.
    pub async fn close(&self) {
        self.memory.close().await;
    }
}
