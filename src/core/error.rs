/// Quarry Error Module
///
/// This module defines the error types for the quarry database layer.
/// It provides structured error handling with proper error propagation
/// across the pool, query, transaction and model layers.
use thiserror::Error;

/// The kind of database constraint a statement violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// UNIQUE / PRIMARY KEY violation
    DuplicateKey,
    /// FOREIGN KEY violation
    ForeignKey,
    /// NOT NULL violation
    NotNull,
    /// CHECK or other constraint
    Other,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConstraintKind::DuplicateKey => "duplicate key",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Other => "constraint",
        };
        f.write_str(s)
    }
}

/// Context for a constraint violation, as far as the driver reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// Table the constraint belongs to, when the driver names it
    pub table: Option<String>,
    /// Column the constraint belongs to, when the driver names it
    pub column: Option<String>,
    /// The driver's own message
    pub message: String,
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} violation", self.kind)?;
        if let Some(table) = &self.table {
            write!(f, " on `{}`", table)?;
            if let Some(column) = &self.column {
                write!(f, ".`{}`", column)?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

/// Comprehensive error type for the quarry database layer.
///
/// Two tiers of contract share this enum. The low-level APIs
/// (Connection, QueryBuilder, Transaction, ConnectionPool) propagate every
/// failure. The model layer keeps the expected/unexpected distinction in
/// the type instead of collapsing it: a missing row is `NotFound` (or
/// `Ok(None)` from the finders), a driver fault stays a driver fault.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Raw driver errors that carry no more specific classification
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection-layer errors (connect failure, use before initialization)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQL query errors (syntax, execution, compilation)
    #[error("Query error: {0}")]
    Query(String),

    /// A SqlValue could not be coerced to the requested type
    #[error("Coercion error: cannot convert {from} to {to}")]
    Coercion { from: &'static str, to: &'static str },

    /// A statement violated a database constraint
    #[error("Constraint error: {0}")]
    Constraint(ConstraintViolation),

    /// Transaction-related errors (wrong state, begin/commit/rollback failure)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The pool could not hand out a connection before the deadline
    #[error("Pool error: acquire timed out after {waited_ms} ms")]
    PoolTimeout { waited_ms: u64 },

    /// The pool has been closed; no further connections will be handed out
    #[error("Pool error: pool is closed")]
    PoolClosed,

    /// Model-layer errors (invalid field, invalid attribute state)
    #[error("Model error: {0}")]
    Model(String),

    /// No row matched the given key. An expected outcome, kept distinct
    /// from driver faults.
    #[error("Record not found")]
    NotFound,

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result to use QuarryError as the error type.
pub type Result<T> = std::result::Result<T, QuarryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let db_err = QuarryError::Database(rusqlite::Error::ExecuteReturnedResults);
        assert!(db_err.to_string().contains("Database error"));

        let query_err = QuarryError::Query("Syntax error".to_string());
        assert!(query_err.to_string().contains("Query error"));

        let pool_err = QuarryError::PoolTimeout { waited_ms: 100 };
        assert!(pool_err.to_string().contains("100 ms"));

        let coercion = QuarryError::Coercion {
            from: "timestamp",
            to: "bool",
        };
        assert!(coercion.to_string().contains("timestamp"));
        assert!(coercion.to_string().contains("bool"));
    }

    #[test]
    fn test_constraint_display_carries_context() {
        let violation = ConstraintViolation {
            kind: ConstraintKind::DuplicateKey,
            table: Some("users".to_string()),
            column: Some("email".to_string()),
            message: "UNIQUE constraint failed: users.email".to_string(),
        };
        let err = QuarryError::Constraint(violation);
        let text = err.to_string();
        assert!(text.contains("duplicate key"));
        assert!(text.contains("`users`"));
        assert!(text.contains("`email`"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let quarry_err: QuarryError = io_err.into();
        match quarry_err {
            QuarryError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }
    }
}
