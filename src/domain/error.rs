//! Domain error types for the orchestrator.
//!
//! This module defines all error types using thiserror for structured error
//! handling. `OrchestratorError` carries the error kinds surfaced to callers
//! and the control API; `DatabaseError` wraps persistence failures.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by orchestration operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Agent with the given id was not found
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Project with the given number was not found
    #[error("Project not found: {0}")]
    ProjectNotFound(u64),

    /// A write carried a stale or missing fence token
    #[error("Fence conflict on project {project}: current fence {current_fence}")]
    FenceConflict { project: u64, current_fence: u64 },

    /// Two claims raced for the same resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A state transition violated the project or agent state machine
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Admission denied by the cost governor
    #[error("Budget denied: {0}")]
    BudgetDenied(String),

    /// An external call exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The issue host or model runtime returned an error
    #[error("External service error: {0}")]
    External(String),

    /// Retryable I/O failure
    #[error("Transient error: {0}")]
    Transient(String),

    /// A bug; the affected worker is crashed, the process is not
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl OrchestratorError {
    /// Stable machine-readable code used in API error bodies.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) | Self::ProjectNotFound(_) => "not_found",
            Self::FenceConflict { .. } | Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invariant",
            Self::BudgetDenied(_) => "budget",
            Self::Timeout(_) => "timeout",
            Self::External(_) => "external",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Returns true if this error is transient and could succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_) | Self::External(_))
    }

    /// Returns true if this error represents a permanent failure.
    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors related to database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Database connection could not be established
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Database constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Row not found in query result
    #[error("Row not found")]
    RowNotFound,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DatabaseError {
    /// Returns true if this error is transient and could succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::QueryFailed(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Database(e) if e.is_unique_violation() => {
                Self::ConstraintViolation(e.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::ConnectionFailed(err.to_string())
            }
            other => Self::QueryFailed(other.to_string()),
        }
    }
}

impl From<uuid::Error> for DatabaseError {
    fn from(err: uuid::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(OrchestratorError::ProjectNotFound(7).code(), "not_found");
        assert_eq!(
            OrchestratorError::FenceConflict { project: 7, current_fence: 3 }.code(),
            "conflict"
        );
        assert_eq!(OrchestratorError::BudgetDenied("daily".into()).code(), "budget");
        assert_eq!(
            OrchestratorError::InvalidTransition { from: "queued".into(), to: "accepted".into() }
                .code(),
            "invariant"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(OrchestratorError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(OrchestratorError::Transient("io".into()).is_transient());
        assert!(OrchestratorError::External("502".into()).is_transient());
        assert!(OrchestratorError::Fatal("bug".into()).is_permanent());
        assert!(OrchestratorError::BudgetDenied("cap".into()).is_permanent());
    }

    #[test]
    fn test_fence_conflict_display() {
        let err = OrchestratorError::FenceConflict { project: 102, current_fence: 9 };
        assert_eq!(err.to_string(), "Fence conflict on project 102: current fence 9");
    }

    #[test]
    fn test_database_error_transient() {
        assert!(DatabaseError::ConnectionFailed("timeout".into()).is_transient());
        assert!(!DatabaseError::ConstraintViolation("unique".into()).is_transient());
    }

    #[test]
    fn test_database_error_converts_to_orchestrator_error() {
        let err: OrchestratorError = DatabaseError::ConnectionFailed("down".into()).into();
        assert!(matches!(err, OrchestratorError::Transient(_)));

        let err: OrchestratorError = DatabaseError::ConstraintViolation("unique".into()).into();
        assert!(matches!(err, OrchestratorError::Fatal(_)));
    }
}
