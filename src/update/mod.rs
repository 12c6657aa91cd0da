//! Region-scoped schema updates
//!
//! This module provides:
//! - [`Version`] parsing and ordering
//! - [`UpdateEntry`] (what an update is) and [`UpdateAction`] (how it runs)
//! - [`UpdateRegistry`] and [`UpdateContributor`] for collecting updates
//! - [`SystemUpdater`] for the precheck/run protocol and its [`UpdateReport`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sysupdater::update::{ColumnKind, ColumnSpec, SchemaChange, UpdateEntry, UpdateRegistry};
//!
//! let mut registry = UpdateRegistry::new();
//! registry.register(
//!     UpdateEntry::initial("crm", "2024-01-15", "Contacts"),
//!     Arc::new(SchemaChange::CreateTable {
//!         table: "t_contact".to_string(),
//!         columns: vec![ColumnSpec::new("id", ColumnKind::BigInteger).primary_key()],
//!     }),
//! )?;
//! registry.register(
//!     UpdateEntry::versioned("crm", "1.1", "2024-03-02", "Contact email")?,
//!     Arc::new(SchemaChange::AddColumn {
//!         table: "t_contact".to_string(),
//!         column: ColumnSpec::new("email", ColumnKind::String).length(255),
//!     }),
//! )?;
//! assert_eq!(registry.execution_order().len(), 2);
//! # Ok::<(), sysupdater::update::UpdateError>(())
//! ```

pub mod action;
pub mod change;
pub mod contributor;
pub mod entry;
pub mod error;
pub mod registry;
pub mod status;
pub mod updater;
pub mod version;

pub use action::{FnUpdate, UpdateAction, UpdateContext};
pub use change::{ColumnKind, ColumnSpec, SchemaChange, SchemaCheck};
pub use contributor::{ContributionOutcome, UpdateContributor};
pub use entry::{PrecheckStatus, RunStatus, UpdateEntry, ISO_DATE_FORMAT};
pub use error::UpdateError;
pub use registry::{UpdateRegistry, UpdateUnit};
pub use status::{EntryReport, UpdateReport};
pub use updater::{RunOptions, SystemUpdater};
pub use version::{QualifierKind, Version};
