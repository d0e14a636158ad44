//! Raft-style leader-based log replication.
//!
//! A simplified in-memory Raft sufficient for swarm decisions: term-numbered
//! elections with randomized timeouts, heartbeat-borne log replication, and
//! majority commit. Replicas reference each other by agent id only; the
//! cluster owns all replica state and advances it through [`RaftCluster::tick`].
//!
//! Not carried over from full Raft: persistent logs across restarts and
//! snapshotting. A replica that fails and returns keeps its in-memory state.

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::ConsensusAlgorithm;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::models::proposal::{
    ConsensusDecision, ConsensusResult, Proposal, Vote,
};

/// Raft timers.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Election timeout base; actual deadlines randomize in `[base, 2*base)`
    pub election_timeout_ms: u64,
    /// Leader heartbeat interval; must stay well under the election timeout
    pub heartbeat_interval_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: 5000,
            heartbeat_interval_ms: 1000,
        }
    }
}

/// Role of a replica within its current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// One replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftLogEntry {
    /// Zero-based position in the log
    pub index: u64,
    /// Term the entry was created in
    pub term: u64,
    pub payload: serde_json::Value,
}

struct Replica {
    id: String,
    term: u64,
    role: RaftRole,
    voted_for: Option<String>,
    leader_id: Option<String>,
    log: Vec<RaftLogEntry>,
    /// Number of committed entries; monotonically non-decreasing
    commit_len: u64,
    election_deadline: Instant,
    next_heartbeat: Instant,
    alive: bool,
}

impl Replica {
    fn last_log_term(&self) -> u64 {
        self.log.last().map_or(0, |e| e.term)
    }

    fn log_key(&self) -> (u64, usize) {
        (self.last_log_term(), self.log.len())
    }
}

struct ClusterState {
    /// Sorted by id so candidate tie-breaks are deterministic
    replicas: Vec<Replica>,
}

/// Outcome of a single Raft proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftOutcome {
    /// Entry acknowledged by a majority and committed
    Committed {
        term: u64,
        commit_index: u64,
        leader: String,
    },
    /// A higher-term leader overwrote the entry before it committed
    Superseded { term: u64 },
    /// No commit within the deadline
    TimedOut,
}

/// An in-memory Raft cluster over a fixed replica set.
pub struct RaftCluster {
    config: RaftConfig,
    state: Mutex<ClusterState>,
}

impl RaftCluster {
    /// Build a cluster with one replica per member id.
    pub fn from_members(config: RaftConfig, members: &[String]) -> Self {
        let now = Instant::now();
        let mut ids: Vec<String> = members.to_vec();
        ids.sort();
        ids.dedup();
        let replicas = ids
            .into_iter()
            .map(|id| Replica {
                id,
                term: 0,
                role: RaftRole::Follower,
                voted_for: None,
                leader_id: None,
                log: Vec::new(),
                commit_len: 0,
                election_deadline: now + Self::random_timeout(&config),
                next_heartbeat: now,
                alive: true,
            })
            .collect();
        Self {
            config,
            state: Mutex::new(ClusterState { replicas }),
        }
    }

    fn random_timeout(config: &RaftConfig) -> Duration {
        let base = config.election_timeout_ms.max(1);
        let jittered = rand::thread_rng().gen_range(base..base * 2);
        Duration::from_millis(jittered)
    }

    /// Advance the cluster to `now`: expire election timers, run elections,
    /// send heartbeats, replicate, and advance commits.
    pub async fn tick(&self, now: Instant) {
        let mut state = self.state.lock().await;
        for idx in 0..state.replicas.len() {
            let (alive, role, election_deadline, next_heartbeat) = {
                let r = &state.replicas[idx];
                (r.alive, r.role, r.election_deadline, r.next_heartbeat)
            };
            if !alive {
                continue;
            }
            match role {
                RaftRole::Leader => {
                    if now >= next_heartbeat {
                        Self::heartbeat_round(&self.config, &mut state, idx, now);
                    }
                }
                RaftRole::Follower | RaftRole::Candidate => {
                    if now >= election_deadline {
                        Self::run_election(&self.config, &mut state, idx, now);
                    }
                }
            }
        }
    }

    /// Candidate at `idx` starts (or restarts) an election.
    fn run_election(config: &RaftConfig, state: &mut ClusterState, idx: usize, now: Instant) {
        let n = state.replicas.len();
        let (candidate_term, candidate_id, candidate_key) = {
            let c = &mut state.replicas[idx];
            c.term += 1;
            c.role = RaftRole::Candidate;
            c.voted_for = Some(c.id.clone());
            c.leader_id = None;
            (c.term, c.id.clone(), c.log_key())
        };
        debug!(candidate = %candidate_id, term = candidate_term, "election started");

        let mut votes = 1usize; // self-vote
        for j in 0..n {
            if j == idx {
                continue;
            }
            let voter = &mut state.replicas[j];
            if !voter.alive || voter.term > candidate_term {
                continue;
            }
            let fresh_term = voter.term < candidate_term;
            let can_vote = fresh_term
                || voter.voted_for.is_none()
                || voter.voted_for.as_deref() == Some(candidate_id.as_str());
            let up_to_date = candidate_key >= voter.log_key();
            if can_vote && up_to_date {
                voter.term = candidate_term;
                voter.voted_for = Some(candidate_id.clone());
                voter.role = RaftRole::Follower;
                voter.election_deadline = now + Self::random_timeout(config);
                votes += 1;
            } else if fresh_term {
                // Refused the vote but still observed the newer term.
                voter.term = candidate_term;
                voter.voted_for = None;
            }
        }

        let candidate = &mut state.replicas[idx];
        if 2 * votes > n {
            candidate.role = RaftRole::Leader;
            candidate.leader_id = Some(candidate.id.clone());
            candidate.next_heartbeat = now;
            info!(leader = %candidate.id, term = candidate.term, votes, "leader elected");
        } else {
            // Lost or split; retry after a fresh randomized timeout.
            candidate.election_deadline = now + Self::random_timeout(config);
        }
    }

    /// Leader at `idx` heartbeats: asserts authority, replicates its log,
    /// and advances the commit point from majority acknowledgement.
    fn heartbeat_round(config: &RaftConfig, state: &mut ClusterState, idx: usize, now: Instant) {
        let n = state.replicas.len();
        let (leader_term, leader_id, leader_log, leader_commit) = {
            let l = &state.replicas[idx];
            (l.term, l.id.clone(), l.log.clone(), l.commit_len)
        };

        // A higher-term replica anywhere forces an immediate step-down.
        if state
            .replicas
            .iter()
            .any(|r| r.alive && r.term > leader_term)
        {
            let l = &mut state.replicas[idx];
            l.role = RaftRole::Follower;
            l.leader_id = None;
            l.election_deadline = now + Self::random_timeout(config);
            debug!(leader = %leader_id, "stepped down on higher term");
            return;
        }

        for j in 0..n {
            if j == idx {
                continue;
            }
            let follower = &mut state.replicas[j];
            if !follower.alive {
                continue;
            }
            follower.term = leader_term;
            follower.role = RaftRole::Follower;
            follower.leader_id = Some(leader_id.clone());
            follower.election_deadline = now + Self::random_timeout(config);

            // Truncate any divergent suffix, then append the leader's tail.
            let mut prefix = 0;
            while prefix < follower.log.len()
                && prefix < leader_log.len()
                && follower.log[prefix].term == leader_log[prefix].term
            {
                prefix += 1;
            }
            follower.log.truncate(prefix);
            follower.log.extend_from_slice(&leader_log[prefix..]);
            follower.commit_len = follower
                .commit_len
                .max(leader_commit.min(follower.log.len() as u64));
        }

        // Majority acknowledgement advances the commit point; only entries
        // from the leader's own term commit by counting.
        let mut commit = leader_commit;
        #[allow(clippy::cast_possible_truncation)]
        for k in (leader_commit + 1)..=(leader_log.len() as u64) {
            let entry = &leader_log[(k - 1) as usize];
            if entry.term != leader_term {
                continue;
            }
            let acks = state
                .replicas
                .iter()
                .filter(|r| {
                    r.log
                        .get((k - 1) as usize)
                        .is_some_and(|e| e.term == entry.term)
                })
                .count();
            if 2 * acks > n {
                commit = k;
            }
        }

        let leader = &mut state.replicas[idx];
        leader.commit_len = leader.commit_len.max(commit);
        leader.next_heartbeat = now + Duration::from_millis(config.heartbeat_interval_ms);
    }

    /// Current leader id, if one holds the highest term.
    pub async fn leader(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .replicas
            .iter()
            .filter(|r| r.alive && r.role == RaftRole::Leader)
            .max_by_key(|r| r.term)
            .map(|r| r.id.clone())
    }

    /// Highest term observed in the cluster.
    pub async fn term(&self) -> u64 {
        let state = self.state.lock().await;
        state.replicas.iter().map(|r| r.term).max().unwrap_or(0)
    }

    /// Take a replica out of the cluster (health-driven failover).
    pub async fn fail_replica(&self, id: &str) -> CoordinationResult<()> {
        let mut state = self.state.lock().await;
        let replica = state
            .replicas
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CoordinationError::NotFound(format!("replica {id}")))?;
        replica.alive = false;
        if replica.role == RaftRole::Leader {
            replica.role = RaftRole::Follower;
            replica.leader_id = None;
        }
        Ok(())
    }

    /// Return a failed replica to the cluster as a follower.
    pub async fn restore_replica(&self, id: &str) -> CoordinationResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let timeout = Self::random_timeout(&self.config);
        let replica = state
            .replicas
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CoordinationError::NotFound(format!("replica {id}")))?;
        replica.alive = true;
        replica.role = RaftRole::Follower;
        replica.election_deadline = now + timeout;
        Ok(())
    }

    /// Committed entries as seen by the given replica.
    pub async fn committed_entries(&self, id: &str) -> CoordinationResult<Vec<RaftLogEntry>> {
        let state = self.state.lock().await;
        let replica = state
            .replicas
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| CoordinationError::NotFound(format!("replica {id}")))?;
        Ok(replica.log[..replica.commit_len as usize].to_vec())
    }

    /// Drive the cluster until `payload` is committed, the entry is
    /// superseded, or `timeout` elapses.
    #[instrument(skip(self, payload))]
    pub async fn propose(&self, payload: serde_json::Value, timeout: Duration) -> RaftOutcome {
        let deadline = Instant::now() + timeout;
        let pace = Duration::from_millis((self.config.heartbeat_interval_ms / 4).max(1));
        let mut appended: Option<(u64, u64)> = None; // (index, term)

        loop {
            let now = Instant::now();
            if now >= deadline {
                return RaftOutcome::TimedOut;
            }
            self.tick(now).await;

            {
                let mut state = self.state.lock().await;
                match appended {
                    None => {
                        if let Some(idx) = state
                            .replicas
                            .iter()
                            .position(|r| r.alive && r.role == RaftRole::Leader)
                        {
                            let leader = &mut state.replicas[idx];
                            let index = leader.log.len() as u64;
                            let term = leader.term;
                            leader.log.push(RaftLogEntry {
                                index,
                                term,
                                payload: payload.clone(),
                            });
                            appended = Some((index, term));
                            debug!(index, term, leader = %leader.id, "entry appended");
                        }
                    }
                    Some((index, term)) => {
                        // Inspect the highest-term authority for the entry's fate.
                        let authority = state
                            .replicas
                            .iter()
                            .filter(|r| r.alive)
                            .max_by_key(|r| (r.term, r.commit_len));
                        if let Some(authority) = authority {
                            match authority.log.get(index as usize) {
                                Some(entry) if entry.term == term => {
                                    if authority.commit_len > index {
                                        let leader = authority
                                            .leader_id
                                            .clone()
                                            .unwrap_or_else(|| authority.id.clone());
                                        return RaftOutcome::Committed {
                                            term,
                                            commit_index: index,
                                            leader,
                                        };
                                    }
                                }
                                Some(entry) => {
                                    // Overwritten under a newer term.
                                    return RaftOutcome::Superseded { term: entry.term };
                                }
                                None if authority.term > term => {
                                    // A newer leader truncated the entry away.
                                    return RaftOutcome::Superseded {
                                        term: authority.term,
                                    };
                                }
                                None => {}
                            }
                        }
                    }
                }
            }

            tokio::time::sleep(pace).await;
        }
    }
}

/// Registry adapter: one Raft round per proposal over its participant set.
pub struct RaftAlgorithm {
    config: RaftConfig,
}

impl RaftAlgorithm {
    pub fn new(config: RaftConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConsensusAlgorithm for RaftAlgorithm {
    fn name(&self) -> &str {
        "raft"
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    // Raft replicates internally; the registry skips vote collection.
    fn collects_votes(&self) -> bool {
        false
    }

    async fn decide(
        &self,
        proposal: &Proposal,
        _votes: &[Vote],
        _timeout_reached: bool,
    ) -> CoordinationResult<ConsensusResult> {
        if proposal.participants.is_empty() {
            return Err(CoordinationError::InvalidArgument(
                "raft requires at least one replica".to_string(),
            ));
        }
        let cluster = RaftCluster::from_members(self.config.clone(), &proposal.participants);
        let outcome = cluster
            .propose(
                proposal.data.clone(),
                Duration::from_millis(proposal.timeout_ms),
            )
            .await;

        let n = proposal.participants.len();
        #[allow(clippy::cast_possible_truncation)]
        let result = match outcome {
            RaftOutcome::Committed {
                term,
                commit_index,
                leader,
            } => {
                let mut result = ConsensusResult::tallied(
                    ConsensusDecision::Approved,
                    &[],
                    self.threshold(),
                    proposal.participants.clone(),
                    self.name(),
                );
                result.votes_for = n as u32;
                result
                    .with_meta("term", json!(term))
                    .with_meta("commit_index", json!(commit_index))
                    .with_meta("leader", json!(leader))
                    .with_meta("algorithm", json!("raft"))
            }
            RaftOutcome::Superseded { term } => ConsensusResult::tallied(
                ConsensusDecision::Rejected,
                &[],
                self.threshold(),
                proposal.participants.clone(),
                self.name(),
            )
            .with_meta("superseding_term", json!(term))
            .with_meta("algorithm", json!("raft")),
            RaftOutcome::TimedOut => ConsensusResult::tallied(
                ConsensusDecision::Timeout,
                &[],
                self.threshold(),
                proposal.participants.clone(),
                self.name(),
            )
            .with_meta("reason", json!("no_commit_within_deadline"))
            .with_meta("algorithm", json!("raft")),
        };
        Ok(result)
    }
}
