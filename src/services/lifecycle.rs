//! Agent lifecycle bookkeeping.
//!
//! Owns the live view of the agent registry. Every transition writes through
//! to durable memory and appends a lifecycle event; the in-memory map serves
//! membership queries without touching the database.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::models::agent::{AgentRecord, AgentState};
use crate::domain::models::event::{EventKind, SwarmEvent};
use crate::infrastructure::database::SwarmMemory;

/// Spawn/heartbeat/terminate bookkeeping for one swarm.
pub struct AgentLifecycle {
    memory: Arc<SwarmMemory>,
    /// Hard cap on live agents
    max_agents: usize,
    /// Heartbeat age past which `health_scan` reports an agent
    failure_threshold: Duration,
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl AgentLifecycle {
    pub fn new(memory: Arc<SwarmMemory>, max_agents: usize, failure_threshold_ms: u64) -> Self {
        Self {
            memory,
            max_agents,
            failure_threshold: Duration::milliseconds(
                i64::try_from(failure_threshold_ms).unwrap_or(i64::MAX),
            ),
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn a new agent of `agent_type`, assigning a unique id.
    #[instrument(skip(self, metadata))]
    pub async fn spawn(
        &self,
        agent_type: &str,
        metadata: serde_json::Value,
    ) -> CoordinationResult<String> {
        let agent_id = format!("{agent_type}-{}", Uuid::new_v4().simple());
        self.register(&agent_id, agent_type, metadata).await?;
        Ok(agent_id)
    }

    /// Register an agent under a caller-chosen id.
    ///
    /// Ids are never reused: a previously terminated or failed id stays
    /// retired and re-registration fails with `AlreadyExists`.
    pub async fn register(
        &self,
        agent_id: &str,
        agent_type: &str,
        metadata: serde_json::Value,
    ) -> CoordinationResult<()> {
        {
            let mut agents = self.agents.write().await;
            if agents.contains_key(agent_id) {
                return Err(CoordinationError::AlreadyExists(format!("agent {agent_id}")));
            }
            let live = agents.values().filter(|a| a.state.is_live()).count();
            if live >= self.max_agents {
                return Err(CoordinationError::InvalidArgument(format!(
                    "registry full: max_agents = {}",
                    self.max_agents
                )));
            }
            let record = AgentRecord::new(agent_id, agent_type).with_metadata(metadata);
            agents.insert(agent_id.to_string(), record);
        }

        // Durable write outside the map lock; roll the map back on failure.
        let record = {
            let agents = self.agents.read().await;
            agents
                .get(agent_id)
                .cloned()
                .ok_or_else(|| CoordinationError::NotFound(format!("agent {agent_id}")))?
        };
        if let Err(e) = self.memory.register_agent(&record).await {
            self.agents.write().await.remove(agent_id);
            return Err(e);
        }
        self.emit(EventKind::AgentSpawned, agent_id, json!({ "agent_type": record.agent_type }))
            .await?;
        info!(agent_id, agent_type, "agent registered");
        Ok(())
    }

    /// Record a heartbeat, promoting freshly spawned agents to active.
    pub async fn heartbeat(&self, agent_id: &str) -> CoordinationResult<()> {
        let now = Utc::now();
        let promoted = {
            let mut agents = self.agents.write().await;
            let record = agents
                .get_mut(agent_id)
                .ok_or_else(|| CoordinationError::NotFound(format!("agent {agent_id}")))?;
            if !record.state.is_live() {
                return Err(CoordinationError::InvalidArgument(format!(
                    "agent {agent_id} is {}",
                    record.state.as_str()
                )));
            }
            record.last_heartbeat = now;
            if record.state == AgentState::Spawned {
                record.state = AgentState::Active;
                true
            } else {
                false
            }
        };

        self.memory.touch_heartbeat(agent_id, now).await?;
        if promoted {
            self.memory
                .update_agent_status(agent_id, AgentState::Active, None)
                .await?;
            self.emit(EventKind::AgentHeartbeat, agent_id, json!({ "promoted": true }))
                .await?;
        }
        Ok(())
    }

    /// Transition an active agent to idle.
    pub async fn mark_idle(&self, agent_id: &str) -> CoordinationResult<()> {
        self.transition(agent_id, AgentState::Idle, EventKind::AgentIdle, json!({}), None)
            .await
    }

    /// Declare an agent failed, recording the reason.
    pub async fn mark_failed(&self, agent_id: &str, reason: &str) -> CoordinationResult<()> {
        warn!(agent_id, reason, "agent marked failed");
        self.transition(
            agent_id,
            AgentState::Failed,
            EventKind::AgentFailed,
            json!({ "reason": reason }),
            None,
        )
        .await
    }

    /// Cleanly retire an agent, accumulating its total task duration.
    pub async fn terminate(&self, agent_id: &str, duration_ms: u64) -> CoordinationResult<()> {
        self.transition(
            agent_id,
            AgentState::Terminated,
            EventKind::AgentTerminated,
            json!({ "duration_ms": duration_ms }),
            Some(duration_ms),
        )
        .await
    }

    async fn transition(
        &self,
        agent_id: &str,
        to: AgentState,
        kind: EventKind,
        payload: serde_json::Value,
        duration_ms: Option<u64>,
    ) -> CoordinationResult<()> {
        {
            let mut agents = self.agents.write().await;
            let record = agents
                .get_mut(agent_id)
                .ok_or_else(|| CoordinationError::NotFound(format!("agent {agent_id}")))?;
            if !record.state.can_transition_to(to) {
                return Err(CoordinationError::InvalidArgument(format!(
                    "agent {agent_id}: illegal transition {} -> {}",
                    record.state.as_str(),
                    to.as_str()
                )));
            }
            record.state = to;
        }
        self.memory
            .update_agent_status(agent_id, to, duration_ms)
            .await?;
        self.emit(kind, agent_id, payload).await?;
        Ok(())
    }

    /// Live agents whose heartbeat has gone stale relative to `now`.
    ///
    /// Reports only; callers decide whether to `mark_failed`.
    pub async fn health_scan(&self, now: DateTime<Utc>) -> Vec<String> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|a| a.state.is_live() && now - a.last_heartbeat > self.failure_threshold)
            .map(|a| a.agent_id.clone())
            .collect()
    }

    /// Ids of all live agents, sorted for deterministic participant sets.
    pub async fn live_members(&self) -> Vec<String> {
        let agents = self.agents.read().await;
        let mut members: Vec<String> = agents
            .values()
            .filter(|a| a.state.is_live())
            .map(|a| a.agent_id.clone())
            .collect();
        members.sort();
        members
    }

    /// Snapshot of one agent's record.
    pub async fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Count of live agents.
    pub async fn live_count(&self) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.state.is_live())
            .count()
    }

    async fn emit(
        &self,
        kind: EventKind,
        agent_id: &str,
        payload: serde_json::Value,
    ) -> CoordinationResult<()> {
        let event = SwarmEvent::new(kind, Some(agent_id.to_string()), payload);
        self.memory.insert_event(&event).await?;
        Ok(())
    }
}
