//! Error types for schema and storage operations.

use crate::types::DataType;
use crate::value::Value;
use alloc::string::String;
use core::fmt;

/// Result type alias for tern core and storage operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for schema and storage operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Type mismatch error.
    TypeMismatch {
        column: String,
        expected: DataType,
        got: DataType,
    },
    /// Null constraint violation.
    NullConstraint { column: String },
    /// Unique constraint violation.
    UniqueConstraint { index: String, key: Value },
    /// Row arity does not match the table schema.
    ArityMismatch { expected: usize, got: usize },
    /// Row not found.
    RowNotFound { table: String, row_id: u64 },
    /// Invalid schema definition.
    InvalidSchema { message: String },
    /// Column not found.
    ColumnNotFound { table: String, column: String },
    /// Table not found.
    TableNotFound { name: String },
    /// Table already exists.
    TableExists { name: String },
    /// Index not found.
    IndexNotFound { table: String, index: String },
    /// Invalid operation.
    InvalidOperation { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch {
                column,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Type mismatch on column {}: expected {}, got {}",
                    column, expected, got
                )
            }
            Error::NullConstraint { column } => {
                write!(f, "Null constraint violation on column: {}", column)
            }
            Error::UniqueConstraint { index, key } => {
                write!(f, "Unique constraint violation on index {}: {}", index, key)
            }
            Error::ArityMismatch { expected, got } => {
                write!(f, "Row arity mismatch: expected {}, got {}", expected, got)
            }
            Error::RowNotFound { table, row_id } => {
                write!(f, "Row {} not found in table {}", row_id, table)
            }
            Error::InvalidSchema { message } => {
                write!(f, "Invalid schema: {}", message)
            }
            Error::ColumnNotFound { table, column } => {
                write!(f, "Column {} not found in table {}", column, table)
            }
            Error::TableNotFound { name } => {
                write!(f, "Table not found: {}", name)
            }
            Error::TableExists { name } => {
                write!(f, "Table already exists: {}", name)
            }
            Error::IndexNotFound { table, index } => {
                write!(f, "Index {} not found in table {}", index, table)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
        }
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Creates a type mismatch error.
    pub fn type_mismatch(column: impl Into<String>, expected: DataType, got: DataType) -> Self {
        Error::TypeMismatch {
            column: column.into(),
            expected,
            got,
        }
    }

    /// Creates a null constraint error.
    pub fn null_constraint(column: impl Into<String>) -> Self {
        Error::NullConstraint {
            column: column.into(),
        }
    }

    /// Creates a unique constraint error.
    pub fn unique_constraint(index: impl Into<String>, key: Value) -> Self {
        Error::UniqueConstraint {
            index: index.into(),
            key,
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(table: impl Into<String>, row_id: u64) -> Self {
        Error::RowNotFound {
            table: table.into(),
            row_id,
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a column not found error.
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound { name: name.into() }
    }

    /// Creates an index not found error.
    pub fn index_not_found(table: impl Into<String>, index: impl Into<String>) -> Self {
        Error::IndexNotFound {
            table: table.into(),
            index: index.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a violated constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::NullConstraint { .. }
                | Error::UniqueConstraint { .. }
                | Error::TypeMismatch { .. }
                | Error::ArityMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::type_mismatch("price", DataType::Decimal, DataType::Text);
        assert!(err.to_string().contains("Type mismatch"));
        assert!(err.to_string().contains("price"));

        let err = Error::null_constraint("name");
        assert!(err.to_string().contains("name"));

        let err = Error::table_not_found("orders");
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_constraint_classification() {
        let err = Error::unique_constraint("idx_sku", Value::Text("TECH-LAP-001".into()));
        assert!(err.is_constraint_violation());
        match err {
            Error::UniqueConstraint { index, .. } => assert_eq!(index, "idx_sku"),
            _ => panic!("Wrong error type"),
        }
        assert!(!Error::table_not_found("x").is_constraint_violation());
    }
}
