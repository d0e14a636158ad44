//! MoAI-Flow - Swarm Coordination Core
//!
//! Distributed coordination substrate for autonomous agent swarms with:
//! - Pluggable communication topologies (hierarchical, mesh, star, ring, adaptive)
//! - Consensus registry with quorum, weighted, Raft, Byzantine, and CRDT algorithms
//! - Conflict-free replicated data types (G-Counter, PN-Counter, LWW-Register, OR-Set)
//! - SQLite-backed durable swarm memory with WAL mode
//! - Token-budget admission control
//! - Append-only pattern collection with lifecycle hooks

pub mod crdt;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::error::{CoordinationError, CoordinationResult, StorageError};
pub use domain::models::config::SwarmConfig;
pub use infrastructure::database::SwarmMemory;
pub use services::coordinator::SwarmCoordinator;
