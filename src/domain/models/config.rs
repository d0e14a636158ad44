//! Declarative configuration for a swarm coordinator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Communication topology kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    /// Rooted tree; broadcasts flow between parent and children
    Hierarchical,
    /// Complete graph minus self-loops
    Mesh,
    /// Designated hub relays between spokes
    Star,
    /// Ordered cycle; broadcast reaches the immediate successor
    Ring,
    /// Chooses mesh/star/hierarchical from the member count at construction
    Adaptive,
}

impl Default for TopologyKind {
    fn default() -> Self {
        Self::Adaptive
    }
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hierarchical => "hierarchical",
            Self::Mesh => "mesh",
            Self::Star => "star",
            Self::Ring => "ring",
            Self::Adaptive => "adaptive",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "hierarchical" => Some(Self::Hierarchical),
            "mesh" => Some(Self::Mesh),
            "star" => Some(Self::Star),
            "ring" => Some(Self::Ring),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum pooled connections
    pub max_connections: u32,
    /// SQLite busy timeout
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error
    pub level: String,
    /// One of: json, pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Complete configuration surface of the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Topology kind, fixed per coordinator instance
    pub topology: TopologyKind,
    /// Hard cap on registry size
    pub max_agents: usize,
    /// Consensus algorithm used when a proposal names none
    pub default_algorithm: String,
    /// Strict-greater majority threshold for the quorum algorithm
    pub quorum_threshold: f64,
    /// Weighted-sum threshold for the weighted algorithm
    pub weighted_threshold: f64,
    /// Maximum faulty participants tolerated by the Byzantine algorithm
    pub byzantine_f: usize,
    /// Raft election timer base
    pub election_timeout_ms: u64,
    /// Raft heartbeat interval
    pub heartbeat_interval_ms: u64,
    /// Default proposal timeout
    pub consensus_timeout_ms: u64,
    /// Wall-clock budget per hook invocation
    pub hook_timeout_ms: u64,
    /// Age at which stored events become prunable
    pub event_retention_days: u32,
    /// Age at which pattern files become prunable
    pub pattern_retention_days: u32,
    /// Base directory for the database and pattern shards
    pub storage_root: PathBuf,
    /// Total token budget; 0 means unlimited
    pub total_token_budget: u64,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            topology: TopologyKind::Adaptive,
            max_agents: 10,
            default_algorithm: "quorum".to_string(),
            quorum_threshold: 0.5,
            weighted_threshold: 0.6,
            byzantine_f: 1,
            election_timeout_ms: 5000,
            heartbeat_interval_ms: 1000,
            consensus_timeout_ms: 30_000,
            hook_timeout_ms: 2000,
            event_retention_days: 30,
            pattern_retention_days: 90,
            storage_root: PathBuf::from("./memory"),
            total_token_budget: 0,
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Path of the embedded database file under `storage_root`.
    pub fn database_path(&self) -> PathBuf {
        self.storage_root.join("swarm.db")
    }

    /// Root of the date-sharded pattern tree under `storage_root`.
    pub fn patterns_root(&self) -> PathBuf {
        self.storage_root.join("patterns")
    }
}
