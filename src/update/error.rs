//! Update-engine error types

use crate::executor::DbError;
use std::fmt;
use std::time::Duration;

/// Errors raised while declaring, registering or running update entries
#[derive(Debug)]
pub enum UpdateError {
    /// A version or date string could not be parsed
    Parse { input: String, reason: String },
    /// A registration was rejected (second initial entry, duplicate version,
    /// role mismatch, missing date under strict dates)
    RegistrationConflict {
        region_id: String,
        version: String,
        reason: String,
    },
    /// Schema introspection failed during precheck
    Precheck {
        region_id: String,
        version: String,
        source: DbError,
    },
    /// Statement generation or execution failed during the run phase
    ExecutionFailure {
        region_id: String,
        version: String,
        error: String,
    },
    /// An entry did not finish within the configured timeout
    Timeout {
        region_id: String,
        version: String,
        limit: Duration,
    },
    /// No free unique constraint name was found within the attempt bound
    ConstraintNameExhausted { base: String, attempts: u32 },
    /// Declared region dependencies form a cycle
    DependencyCycle { regions: Vec<String> },
    /// Caller supplied an unusable argument
    InvalidInput(String),
    /// Collaborator (introspection/execution) error outside of a specific entry
    Database(DbError),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::Parse { input, reason } => {
                write!(f, "Cannot parse '{input}': {reason}")
            }
            UpdateError::RegistrationConflict {
                region_id,
                version,
                reason,
            } => {
                write!(
                    f,
                    "Update {version} of region '{region_id}' rejected at registration: {reason}"
                )
            }
            UpdateError::Precheck {
                region_id,
                version,
                source,
            } => {
                write!(
                    f,
                    "Precheck of update {version} in region '{region_id}' failed: {source}"
                )
            }
            UpdateError::ExecutionFailure {
                region_id,
                version,
                error,
            } => {
                write!(
                    f,
                    "Update {version} in region '{region_id}' failed during execution: {error}"
                )
            }
            UpdateError::Timeout {
                region_id,
                version,
                limit,
            } => {
                write!(
                    f,
                    "Update {version} in region '{region_id}' did not finish within {limit:?}"
                )
            }
            UpdateError::ConstraintNameExhausted { base, attempts } => {
                write!(
                    f,
                    "No free unique constraint name for base '{base}' after {attempts} attempts"
                )
            }
            UpdateError::DependencyCycle { regions } => {
                write!(
                    f,
                    "Region dependencies form a cycle between: {}",
                    regions.join(", ")
                )
            }
            UpdateError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            UpdateError::Database(e) => write!(f, "Database error: {e}"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::Precheck { source, .. } => Some(source),
            UpdateError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for UpdateError {
    fn from(error: DbError) -> Self {
        UpdateError::Database(error)
    }
}
