//! Communication topology management.
//!
//! Maintains the membership list and derives each member's neighbour set
//! from the active topology. Delivery is in-process: every member owns the
//! receiving half of an unbounded channel, which preserves per-sender order.
//!
//! The adaptive kind resolves to a concrete topology from the current member
//! count; the resolution is recomputed only when membership changes, never
//! during a broadcast.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::models::config::TopologyKind;
use crate::domain::models::message::BroadcastMessage;

/// Membership and edge summary returned by `get_topology_info`.
#[derive(Debug, Clone)]
pub struct TopologyInfo {
    /// Kind the manager was constructed with
    pub declared: TopologyKind,
    /// Concrete kind currently in effect (differs only for adaptive)
    pub effective: TopologyKind,
    pub member_count: usize,
    /// Members in registration order
    pub members: Vec<String>,
    pub edge_count: usize,
}

struct Inner {
    /// Registration order; position determines tree/ring/star structure
    members: Vec<String>,
    senders: HashMap<String, mpsc::UnboundedSender<BroadcastMessage>>,
}

/// Routes broadcasts according to the active topology.
pub struct TopologyManager {
    kind: TopologyKind,
    inner: RwLock<Inner>,
}

impl TopologyManager {
    pub fn new(kind: TopologyKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(Inner {
                members: Vec::new(),
                senders: HashMap::new(),
            }),
        }
    }

    /// Kind this manager was constructed with; immutable for its lifetime.
    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    /// Add a member and hand back its message inbox.
    pub async fn add_member(
        &self,
        agent_id: &str,
    ) -> CoordinationResult<mpsc::UnboundedReceiver<BroadcastMessage>> {
        let mut inner = self.inner.write().await;
        if inner.senders.contains_key(agent_id) {
            return Err(CoordinationError::AlreadyExists(format!("member {agent_id}")));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.members.push(agent_id.to_string());
        inner.senders.insert(agent_id.to_string(), tx);
        debug!(agent_id, members = inner.members.len(), "member added");
        Ok(rx)
    }

    /// Remove a member, closing its inbox.
    pub async fn remove_member(&self, agent_id: &str) -> CoordinationResult<()> {
        let mut inner = self.inner.write().await;
        if inner.senders.remove(agent_id).is_none() {
            return Err(CoordinationError::NotFound(format!("member {agent_id}")));
        }
        inner.members.retain(|m| m != agent_id);
        Ok(())
    }

    /// Neighbour set of `agent_id` under the effective topology.
    pub async fn neighbors(&self, agent_id: &str) -> CoordinationResult<Vec<String>> {
        let inner = self.inner.read().await;
        let index = Self::index_of(&inner.members, agent_id)?;
        Ok(Self::neighbor_indices(self.effective_kind(inner.members.len()), index, inner.members.len())
            .into_iter()
            .map(|i| inner.members[i].clone())
            .collect())
    }

    /// Deliver `message` to every recipient the topology defines for
    /// `from`, minus `exclude`. Returns the number of deliveries.
    #[instrument(skip(self, message, exclude), fields(from = %from))]
    pub async fn broadcast(
        &self,
        from: &str,
        message: &BroadcastMessage,
        exclude: &[String],
    ) -> CoordinationResult<usize> {
        let inner = self.inner.read().await;
        let index = Self::index_of(&inner.members, from)?;
        let effective = self.effective_kind(inner.members.len());

        // A root broadcast in a hierarchy fans out to the whole tree.
        let recipients: Vec<usize> =
            if effective == TopologyKind::Hierarchical && index == 0 {
                (1..inner.members.len()).collect()
            } else {
                Self::neighbor_indices(effective, index, inner.members.len())
            };

        let mut delivered = 0;
        for i in recipients {
            let member = &inner.members[i];
            if member == from || exclude.contains(member) {
                continue;
            }
            if let Some(sender) = inner.senders.get(member) {
                if sender.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(delivered, "broadcast routed");
        Ok(delivered)
    }

    /// Deliver directly to one member's inbox, outside topology routing.
    /// Used by the coordinator for vote solicitations that must reach every
    /// participant regardless of the communication graph.
    pub async fn send_to(
        &self,
        agent_id: &str,
        message: &BroadcastMessage,
    ) -> CoordinationResult<bool> {
        let inner = self.inner.read().await;
        let sender = inner
            .senders
            .get(agent_id)
            .ok_or_else(|| CoordinationError::NotFound(format!("member {agent_id}")))?;
        Ok(sender.send(message.clone()).is_ok())
    }

    /// Current membership and edge summary.
    pub async fn get_topology_info(&self) -> TopologyInfo {
        let inner = self.inner.read().await;
        let n = inner.members.len();
        let effective = self.effective_kind(n);
        TopologyInfo {
            declared: self.kind,
            effective,
            member_count: n,
            members: inner.members.clone(),
            edge_count: Self::edge_count(effective, n),
        }
    }

    /// Current members in registration order.
    pub async fn members(&self) -> Vec<String> {
        self.inner.read().await.members.clone()
    }

    // -------------------------------------------------------------------------
    // Structure derivation
    // -------------------------------------------------------------------------

    fn effective_kind(&self, member_count: usize) -> TopologyKind {
        match self.kind {
            TopologyKind::Adaptive => {
                if member_count <= 3 {
                    TopologyKind::Mesh
                } else if member_count <= 7 {
                    TopologyKind::Star
                } else {
                    TopologyKind::Hierarchical
                }
            }
            other => other,
        }
    }

    /// Neighbour indices of position `index` among `n` members.
    fn neighbor_indices(kind: TopologyKind, index: usize, n: usize) -> Vec<usize> {
        if n <= 1 {
            return Vec::new();
        }
        match kind {
            TopologyKind::Mesh => (0..n).filter(|&i| i != index).collect(),
            TopologyKind::Star => {
                if index == 0 {
                    (1..n).collect()
                } else {
                    vec![0]
                }
            }
            TopologyKind::Ring => vec![(index + 1) % n],
            TopologyKind::Hierarchical => {
                // Complete binary tree in registration order.
                let mut neighbors = Vec::new();
                if index > 0 {
                    neighbors.push((index - 1) / 2);
                }
                for child in [2 * index + 1, 2 * index + 2] {
                    if child < n {
                        neighbors.push(child);
                    }
                }
                neighbors
            }
            // Resolved before this point; an unresolved adaptive routes nowhere.
            TopologyKind::Adaptive => Vec::new(),
        }
    }

    fn edge_count(kind: TopologyKind, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        match kind {
            TopologyKind::Mesh => n * (n - 1) / 2,
            TopologyKind::Star | TopologyKind::Hierarchical => n - 1,
            TopologyKind::Ring => n,
            TopologyKind::Adaptive => 0,
        }
    }

    fn index_of(members: &[String], agent_id: &str) -> CoordinationResult<usize> {
        members
            .iter()
            .position(|m| m == agent_id)
            .ok_or_else(|| CoordinationError::NotFound(format!("member {agent_id}")))
    }
}
