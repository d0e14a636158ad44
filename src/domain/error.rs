//! Error types for the coordination core.
//!
//! All fallible operations return structured errors built with thiserror.
//! Consensus algorithms never error for "the decision was no": a rejected or
//! timed-out proposal is a normal [`ConsensusResult`], not an error.
//!
//! [`ConsensusResult`]: crate::domain::models::proposal::ConsensusResult

use thiserror::Error;

/// Convenience alias used throughout the services layer.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Top-level error taxonomy for coordination operations.
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// Malformed input: empty participant set, negative budget, bad threshold.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown agent, missing proposal, or absent session.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate algorithm name or duplicate agent id.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Token allocation or consumption would overflow the budget.
    #[error("Budget exceeded: requested {requested}, available {available}")]
    BudgetExceeded { requested: u64, available: u64 },

    /// Durable write or read failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A blocking operation exceeded its wall-clock deadline.
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// No decision is reachable, e.g. Raft never elected a leader in time.
    #[error("Consensus failure: {0}")]
    ConsensusFailure(String),
}

impl CoordinationError {
    /// Returns true if this error is transient and the operation could
    /// succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::ConsensusFailure(_) => true,
            Self::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error represents a permanent failure.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors from the durable swarm memory.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection pool could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration {version} failed: {message}")]
    MigrationFailed { version: i64, message: String },

    /// Record serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row exists but holds a value the schema does not allow
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: String, message: String },
}

impl From<sqlx::Error> for CoordinationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::QueryFailed(err))
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}

impl StorageError {
    /// Returns true if this error is transient and could succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) => true,
            Self::QueryFailed(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = CoordinationError::InvalidArgument("participants empty".to_string());
        assert_eq!(err.to_string(), "Invalid argument: participants empty");
    }

    #[test]
    fn test_budget_exceeded_display() {
        let err = CoordinationError::BudgetExceeded {
            requested: 50,
            available: 40,
        };
        assert_eq!(err.to_string(), "Budget exceeded: requested 50, available 40");
    }

    #[test]
    fn test_timeout_display() {
        let err = CoordinationError::Timeout {
            operation: "request_consensus".to_string(),
            timeout_ms: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "Operation 'request_consensus' timed out after 30000ms"
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = CoordinationError::Timeout {
            operation: "x".to_string(),
            timeout_ms: 1,
        };
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_not_found_is_permanent() {
        let err = CoordinationError::NotFound("agent-9".to_string());
        assert!(err.is_permanent());
    }

    #[test]
    fn test_storage_connection_failed_is_transient() {
        let err = StorageError::ConnectionFailed("busy".to_string());
        assert!(err.is_transient());
        assert!(CoordinationError::from(err).is_transient());
    }

    #[test]
    fn test_corrupt_row_is_permanent() {
        let err = StorageError::CorruptRow {
            table: "agent_registry".to_string(),
            message: "bad status".to_string(),
        };
        assert!(!err.is_transient());
    }
}
