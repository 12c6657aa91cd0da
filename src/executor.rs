//! Collaborator traits for the update engine
//!
//! The engine never talks to a database directly. It asks a
//! [`SchemaIntrospector`] whether an update's effect already exists and hands
//! the generated statements of each update to an [`UpdateExecutor`].
//!
//! A PostgreSQL implementation of both lives in [`crate::postgres`]; tests use
//! the in-memory schema from `test_helpers` (feature `test-helpers`).

use may_postgres::Error as PostgresError;
use std::fmt;

/// Error returned by introspection and execution collaborators
#[derive(Debug)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Query or statement failed
    QueryError(String),
    /// Other collaborator errors (connectivity, permissions, ...)
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            DbError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            DbError::Other(s) => {
                write!(f, "Database error: {s}")
            }
        }
    }
}

impl std::error::Error for DbError {}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        DbError::PostgresError(err)
    }
}

/// Read-only questions about the live schema, used by the precheck phase
///
/// Table, column and index names are compared the way the backing database
/// folds unquoted identifiers; implementations decide the exact rule.
pub trait SchemaIntrospector: Send + Sync {
    /// Does `table` exist?
    fn table_exists(&self, table: &str) -> Result<bool, DbError>;

    /// Does `table` have a column named `column`?
    fn column_exists(&self, table: &str, column: &str) -> Result<bool, DbError>;

    /// Does an index named `index` exist on `table`?
    fn index_exists(&self, table: &str, index: &str) -> Result<bool, DbError>;

    /// Names of all constraints currently declared on `table`
    ///
    /// Used to pick collision-free constraint names.
    fn constraint_names(&self, table: &str) -> Result<Vec<String>, DbError>;

    /// Is there a unique constraint on `table` covering exactly `columns`
    /// (in any order)?
    fn unique_constraint_exists(&self, table: &str, columns: &[String]) -> Result<bool, DbError>;
}

/// Executes the statements of one update entry
pub trait UpdateExecutor: Send + Sync {
    /// Execute `statements` as one unit
    ///
    /// Implementations run the batch inside a transaction where the database
    /// supports transactional DDL, so a failed entry leaves no partial state.
    ///
    /// # Errors
    ///
    /// Returns `DbError` for the first failing statement; the remaining
    /// statements of the batch are not executed.
    fn execute_batch(&self, statements: &[String]) -> Result<(), DbError>;

    /// Whether batches from different threads may run at the same time
    ///
    /// A single connection cannot interleave two transactions, so the default
    /// is `false` and the updater keeps regions sequential.
    fn supports_concurrent_batches(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_display() {
        let err = DbError::QueryError("syntax error".to_string());
        assert!(err.to_string().contains("Query error"));
        assert!(err.to_string().contains("syntax error"));

        let err = DbError::Other("connection refused".to_string());
        assert!(err.to_string().contains("Database error"));
    }

    struct NullExecutor;

    impl UpdateExecutor for NullExecutor {
        fn execute_batch(&self, _statements: &[String]) -> Result<(), DbError> {
            Ok(())
        }
    }

    #[test]
    fn test_executor_defaults_to_sequential_batches() {
        assert!(!NullExecutor.supports_concurrent_batches());
        assert!(NullExecutor.execute_batch(&[]).is_ok());
    }
}
