//! Durable swarm memory.
//!
//! SQLite-backed storage using sqlx with:
//! - WAL journal mode for concurrent readers alongside the single writer
//! - Embedded versioned migrations
//! - A process-wide handle registry keyed by storage root

pub mod connection;
pub mod migrations;
pub mod swarm_memory;

pub use connection::DatabaseConnection;
pub use migrations::{all_embedded_migrations, Migration, Migrator};
pub use swarm_memory::{MemoryStats, MemoryTransaction, SwarmMemory};
