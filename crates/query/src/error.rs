//! Query error types.

use thiserror::Error;

/// Errors raised while planning or executing a query.
///
/// Planning errors (`Schema`, `Type`, `Unsupported`) surface before any row is
/// produced. `Execution` errors end the result stream: rows yielded before the
/// error stay yielded and nothing follows the error.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum QueryError {
    /// Unknown or ambiguous table or column.
    #[error("schema error: {0}")]
    Schema(String),
    /// Expression applied to incompatible types.
    #[error("type error: {0}")]
    Type(String),
    /// Reserved for a write path.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Invariant violation or arithmetic failure while running a plan.
    #[error("execution error: {0}")]
    Execution(String),
    /// Well-formed input the engine does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Error reported by the storage layer.
    #[error(transparent)]
    Storage(#[from] tern_core::Error),
}

impl QueryError {
    /// Unknown table or common table expression.
    pub fn unknown_table(name: &str) -> Self {
        QueryError::Schema(format!("unknown table '{}'", name))
    }

    /// Unknown column.
    pub fn unknown_column(name: &str) -> Self {
        QueryError::Schema(format!("unknown column '{}'", name))
    }

    /// Column name matching more than one input column.
    pub fn ambiguous_column(name: &str) -> Self {
        QueryError::Schema(format!("column reference '{}' is ambiguous", name))
    }

    /// Type error with a free-form description.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        QueryError::Type(message.into())
    }

    /// Execution error with a free-form description.
    pub fn execution(message: impl Into<String>) -> Self {
        QueryError::Execution(message.into())
    }

    /// Unsupported construct.
    pub fn unsupported(message: impl Into<String>) -> Self {
        QueryError::Unsupported(message.into())
    }

    /// Returns true for errors detected while planning.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            QueryError::Schema(_) | QueryError::Type(_) | QueryError::Unsupported(_)
        )
    }
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
