//! Executable half of an update entry
//!
//! An [`UpdateEntry`](crate::update::UpdateEntry) only describes *which*
//! update it is. *How* the update is detected and applied is supplied
//! separately as an [`UpdateAction`], either a tagged
//! [`SchemaChange`](crate::update::SchemaChange) or a closure pair wrapped in
//! [`FnUpdate`].

use crate::dialect::DatabaseSupport;
use crate::executor::{DbError, SchemaIntrospector, UpdateExecutor};
use crate::update::UpdateError;
use std::fmt;
use std::sync::Arc;

/// Collaborators available to an action during precheck and run
///
/// Cloning is cheap; the updater hands clones to helper threads when an entry
/// timeout or parallel regions are configured.
#[derive(Clone)]
pub struct UpdateContext {
    introspector: Arc<dyn SchemaIntrospector>,
    executor: Arc<dyn UpdateExecutor>,
    support: Arc<DatabaseSupport>,
}

impl UpdateContext {
    pub fn new(
        introspector: Arc<dyn SchemaIntrospector>,
        executor: Arc<dyn UpdateExecutor>,
        support: Arc<DatabaseSupport>,
    ) -> Self {
        Self {
            introspector,
            executor,
            support,
        }
    }

    pub fn introspector(&self) -> &dyn SchemaIntrospector {
        self.introspector.as_ref()
    }

    pub fn executor(&self) -> &dyn UpdateExecutor {
        self.executor.as_ref()
    }

    pub fn support(&self) -> &DatabaseSupport {
        &self.support
    }
}

impl fmt::Debug for UpdateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateContext")
            .field("dialect", &self.support.dialect())
            .finish_non_exhaustive()
    }
}

/// Detection and application logic of one update
pub trait UpdateAction: Send + Sync {
    /// Is the effect of this update already present in the live schema?
    ///
    /// Must be read-only. `Ok(true)` marks the entry `AlreadyUpdated`.
    fn is_applied(&self, ctx: &UpdateContext) -> Result<bool, DbError>;

    /// Statements that bring the schema to this update's state
    ///
    /// Executed by the updater as one batch through the context's executor.
    fn statements(&self, ctx: &UpdateContext) -> Result<Vec<String>, UpdateError>;

    /// Static sanity check run once at registration
    fn validate(&self) -> Result<(), UpdateError> {
        Ok(())
    }
}

type PrecheckFn = dyn Fn(&UpdateContext) -> Result<bool, DbError> + Send + Sync;
type StatementsFn = dyn Fn(&UpdateContext) -> Result<Vec<String>, UpdateError> + Send + Sync;

/// Closure-backed [`UpdateAction`] for updates that need custom logic
///
/// # Example
///
/// ```rust
/// use sysupdater::update::FnUpdate;
///
/// let action = FnUpdate::new(
///     |ctx| ctx.introspector().column_exists("t_user", "locale"),
///     |_ctx| Ok(vec!["ALTER TABLE t_user ADD COLUMN locale VARCHAR(16)".to_string()]),
/// );
/// # let _ = action;
/// ```
pub struct FnUpdate {
    precheck: Box<PrecheckFn>,
    statements: Box<StatementsFn>,
}

impl FnUpdate {
    pub fn new<P, S>(precheck: P, statements: S) -> Self
    where
        P: Fn(&UpdateContext) -> Result<bool, DbError> + Send + Sync + 'static,
        S: Fn(&UpdateContext) -> Result<Vec<String>, UpdateError> + Send + Sync + 'static,
    {
        Self {
            precheck: Box::new(precheck),
            statements: Box::new(statements),
        }
    }
}

impl UpdateAction for FnUpdate {
    fn is_applied(&self, ctx: &UpdateContext) -> Result<bool, DbError> {
        (self.precheck)(ctx)
    }

    fn statements(&self, ctx: &UpdateContext) -> Result<Vec<String>, UpdateError> {
        (self.statements)(ctx)
    }
}

impl fmt::Debug for FnUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnUpdate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::test_helpers::InMemorySchema;

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_cloned_context_shares_collaborators() {
        let schema = Arc::new(InMemorySchema::new());
        let ctx = UpdateContext::new(
            schema.clone(),
            schema.clone(),
            Arc::new(DatabaseSupport::new(Dialect::Sqlite)),
        );
        let clone = ctx.clone();

        let action = FnUpdate::new(
            |ctx| ctx.introspector().table_exists("t_note"),
            |_ctx| Ok(vec!["CREATE TABLE t_note (id INTEGER)".to_string()]),
        );
        assert!(!action.is_applied(&ctx).expect("precheck"));
        let statements = action.statements(&clone).expect("statements");
        clone.executor().execute_batch(&statements).expect("batch");

        assert!(action.is_applied(&ctx).expect("precheck"));
        assert_eq!(schema.executed_batches(), 1);
        assert_eq!(clone.support().dialect(), Dialect::Sqlite);
    }
}
