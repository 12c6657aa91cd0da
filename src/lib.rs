//! # sysupdater
//!
//! Region-scoped schema update engine.
//!
//! Modules (regions) contribute versioned update entries at startup. The
//! [`SystemUpdater`](update::SystemUpdater) orders them, prechecks each one
//! against the live schema and runs only what is missing, so repeated
//! startups are idempotent without a ledger table.
//!
//! - [`update`]: versions, entries, registry, runner and reports
//! - [`dialect`]: per-database SQL fragments, DDL rendering, constraint naming
//! - [`executor`]: collaborator traits for introspection and execution
//! - [`postgres`]: PostgreSQL implementation of the collaborators
//! - [`config`]: `UpdaterConfig::load()` from `config/config.toml` or env vars

pub mod config;
pub mod connection;
pub mod dialect;
pub mod executor;
pub mod metrics;
pub mod postgres;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod update;

pub use config::UpdaterConfig;
pub use dialect::{DatabaseSupport, Dialect};
pub use executor::{DbError, SchemaIntrospector, UpdateExecutor};
pub use update::{
    SystemUpdater, UpdateContext, UpdateEntry, UpdateError, UpdateRegistry, UpdateReport, Version,
};
