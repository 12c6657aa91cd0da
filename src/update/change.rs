//! Tagged schema changes
//!
//! [`SchemaChange`] is the declarative form of an update action: plain data
//! that knows how to detect its own effect through the introspector and how to
//! render its DDL for the configured dialect. Being plain data it can be
//! loaded from a manifest and shown in reports.

use crate::executor::{DbError, SchemaIntrospector};
use crate::update::{UpdateAction, UpdateContext, UpdateError};
use sea_query::ColumnDef;
use serde::{Deserialize, Serialize};

/// Column type of a [`ColumnSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    BigInteger,
    Boolean,
    Text,
    String,
    Timestamp,
    TimestampTz,
    Date,
    Uuid,
    Json,
    Decimal,
    Double,
}

/// Column definition used by `CreateTable` and `AddColumn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    /// Length for `String` columns
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    /// Raw SQL default expression, rendered as `DEFAULT <expr>`
    #[serde(default)]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// A nullable column of the given kind
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            length: None,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            default: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Build the `sea-query` column definition
    pub(crate) fn to_column_def(&self) -> ColumnDef {
        let mut def = ColumnDef::new(self.name.clone());
        match self.kind {
            ColumnKind::Integer => def.integer(),
            ColumnKind::BigInteger => def.big_integer(),
            ColumnKind::Boolean => def.boolean(),
            ColumnKind::Text => def.text(),
            ColumnKind::String => match self.length {
                Some(len) => def.string_len(len),
                None => def.string(),
            },
            ColumnKind::Timestamp => def.timestamp(),
            ColumnKind::TimestampTz => def.timestamp_with_time_zone(),
            ColumnKind::Date => def.date(),
            ColumnKind::Uuid => def.uuid(),
            ColumnKind::Json => def.json(),
            ColumnKind::Decimal => def.decimal(),
            ColumnKind::Double => def.double(),
        };
        if self.nullable {
            def.null();
        } else {
            def.not_null();
        }
        if self.primary_key {
            def.primary_key();
        }
        if self.auto_increment {
            def.auto_increment();
        }
        if let Some(expr) = &self.default {
            def.extra(format!("DEFAULT {expr}"));
        }
        def
    }
}

/// Read-only schema predicate used by raw SQL changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaCheck {
    TableExists { table: String },
    ColumnExists { table: String, column: String },
    IndexExists { table: String, index: String },
    ConstraintExists { table: String, constraint: String },
    UniqueConstraintExists { table: String, columns: Vec<String> },
    /// Holds when every nested check holds
    All { checks: Vec<SchemaCheck> },
}

impl SchemaCheck {
    /// Evaluate the predicate against the live schema
    pub fn evaluate(&self, introspector: &dyn SchemaIntrospector) -> Result<bool, DbError> {
        match self {
            SchemaCheck::TableExists { table } => introspector.table_exists(table),
            SchemaCheck::ColumnExists { table, column } => introspector.column_exists(table, column),
            SchemaCheck::IndexExists { table, index } => introspector.index_exists(table, index),
            SchemaCheck::ConstraintExists { table, constraint } => Ok(introspector
                .constraint_names(table)?
                .iter()
                .any(|name| name.eq_ignore_ascii_case(constraint))),
            SchemaCheck::UniqueConstraintExists { table, columns } => {
                introspector.unique_constraint_exists(table, columns)
            }
            SchemaCheck::All { checks } => {
                for check in checks {
                    if !check.evaluate(introspector)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

/// Declarative schema change usable as an [`UpdateAction`]
///
/// # Example
///
/// ```rust
/// use sysupdater::update::{ColumnKind, ColumnSpec, SchemaChange};
///
/// let change = SchemaChange::CreateTable {
///     table: "t_user".to_string(),
///     columns: vec![
///         ColumnSpec::new("id", ColumnKind::BigInteger).primary_key().auto_increment(),
///         ColumnSpec::new("username", ColumnKind::String).length(255).not_null(),
///     ],
/// };
/// # let _ = change;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    /// Unique constraint whose name is chosen by
    /// [`DatabaseSupport::create_unique_constraint_name`](crate::dialect::DatabaseSupport::create_unique_constraint_name)
    AddUniqueConstraint {
        table: String,
        columns: Vec<String>,
    },
    /// Hand-written statements guarded by an explicit check
    Sql {
        check: SchemaCheck,
        statements: Vec<String>,
    },
    /// Several changes applied as one entry; only missing parts are rendered
    Composite {
        changes: Vec<SchemaChange>,
    },
}

impl UpdateAction for SchemaChange {
    fn is_applied(&self, ctx: &UpdateContext) -> Result<bool, DbError> {
        let introspector = ctx.introspector();
        match self {
            SchemaChange::CreateTable { table, .. } => introspector.table_exists(table),
            SchemaChange::AddColumn { table, column } => {
                introspector.column_exists(table, &column.name)
            }
            SchemaChange::CreateIndex { table, name, .. } => introspector.index_exists(table, name),
            SchemaChange::AddUniqueConstraint { table, columns } => {
                introspector.unique_constraint_exists(table, columns)
            }
            SchemaChange::Sql { check, .. } => check.evaluate(introspector),
            SchemaChange::Composite { changes } => {
                for change in changes {
                    if !change.is_applied(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn statements(&self, ctx: &UpdateContext) -> Result<Vec<String>, UpdateError> {
        let support = ctx.support();
        match self {
            SchemaChange::CreateTable { table, columns } => {
                Ok(vec![support.render_create_table(table, columns)])
            }
            SchemaChange::AddColumn { table, column } => {
                Ok(vec![support.render_add_column(table, column)])
            }
            SchemaChange::CreateIndex {
                table,
                name,
                columns,
                unique,
            } => Ok(vec![support.render_create_index(table, name, columns, *unique)]),
            SchemaChange::AddUniqueConstraint { table, columns } => {
                let existing = ctx.introspector().constraint_names(table)?;
                let name = support.create_unique_constraint_name(table, columns, &existing)?;
                Ok(vec![support.render_add_unique_constraint(table, &name, columns)])
            }
            SchemaChange::Sql { statements, .. } => Ok(statements.clone()),
            SchemaChange::Composite { changes } => {
                let mut statements = Vec::new();
                for change in changes {
                    if !change.is_applied(ctx)? {
                        statements.extend(change.statements(ctx)?);
                    }
                }
                Ok(statements)
            }
        }
    }

    fn validate(&self) -> Result<(), UpdateError> {
        match self {
            SchemaChange::CreateTable { table, columns } if columns.is_empty() => Err(
                UpdateError::InvalidInput(format!("table '{table}' is created without columns")),
            ),
            SchemaChange::CreateIndex { name, columns, .. } if columns.is_empty() => Err(
                UpdateError::InvalidInput(format!("index '{name}' has no columns")),
            ),
            SchemaChange::AddUniqueConstraint { table, columns } if columns.is_empty() => {
                Err(UpdateError::InvalidInput(format!(
                    "unique constraint on '{table}' has no columns"
                )))
            }
            SchemaChange::Sql { statements, .. } if statements.is_empty() => Err(
                UpdateError::InvalidInput("raw SQL change without statements".to_string()),
            ),
            SchemaChange::Composite { changes } => {
                changes.iter().try_for_each(|change| change.validate())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DatabaseSupport, Dialect};
    use crate::test_helpers::InMemorySchema;
    use std::sync::Arc;

    fn context(schema: &Arc<InMemorySchema>) -> UpdateContext {
        UpdateContext::new(
            schema.clone(),
            schema.clone(),
            Arc::new(DatabaseSupport::new(Dialect::Postgres)),
        )
    }

    fn users_table() -> SchemaChange {
        SchemaChange::CreateTable {
            table: "t_user".to_string(),
            columns: vec![
                ColumnSpec::new("id", ColumnKind::BigInteger).primary_key(),
                ColumnSpec::new("username", ColumnKind::String).length(64).not_null(),
            ],
        }
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_create_table_precheck_follows_schema() {
        let schema = Arc::new(InMemorySchema::new());
        let ctx = context(&schema);
        let change = users_table();

        assert!(!change.is_applied(&ctx).expect("precheck"));
        let statements = change.statements(&ctx).expect("statements");
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE TABLE"));

        schema.execute_all(&statements).expect("apply");
        assert!(change.is_applied(&ctx).expect("precheck"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_unique_constraint_name_avoids_existing_constraints() {
        let schema = Arc::new(InMemorySchema::new());
        schema.add_table("t_mytable", &["tenant_id", "username"]);
        schema.add_constraint("t_mytable", "t_mytable_uq_tenant_i1", &["tenant_id"]);
        let ctx = context(&schema);

        let change = SchemaChange::AddUniqueConstraint {
            table: "t_mytable".to_string(),
            columns: vec!["tenant_id".to_string(), "username".to_string()],
        };
        assert!(!change.is_applied(&ctx).expect("precheck"));
        let statements = change.statements(&ctx).expect("statements");
        assert!(statements[0].contains("\"t_mytable_uq_tenant_i2\""), "{}", statements[0]);

        schema.execute_all(&statements).expect("apply");
        assert!(change.is_applied(&ctx).expect("precheck"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_composite_renders_only_missing_parts() {
        let schema = Arc::new(InMemorySchema::new());
        schema.add_table("t_user", &["id", "username"]);
        let ctx = context(&schema);

        let change = SchemaChange::Composite {
            changes: vec![
                users_table(),
                SchemaChange::AddColumn {
                    table: "t_user".to_string(),
                    column: ColumnSpec::new("locale", ColumnKind::String).length(16),
                },
            ],
        };
        assert!(!change.is_applied(&ctx).expect("precheck"));
        let statements = change.statements(&ctx).expect("statements");
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("ADD COLUMN"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_sql_change_uses_explicit_check() {
        let schema = Arc::new(InMemorySchema::new());
        schema.add_table("t_user", &["id"]);
        let ctx = context(&schema);

        let change = SchemaChange::Sql {
            check: SchemaCheck::All {
                checks: vec![
                    SchemaCheck::TableExists { table: "t_user".to_string() },
                    SchemaCheck::ColumnExists {
                        table: "t_user".to_string(),
                        column: "email".to_string(),
                    },
                ],
            },
            statements: vec!["ALTER TABLE t_user ADD COLUMN email VARCHAR(255)".to_string()],
        };
        assert!(!change.is_applied(&ctx).expect("precheck"));
        schema.add_column("t_user", "email");
        assert!(change.is_applied(&ctx).expect("precheck"));
    }

    #[test]
    fn test_validate_rejects_empty_definitions() {
        let empty_table = SchemaChange::CreateTable {
            table: "t_empty".to_string(),
            columns: vec![],
        };
        assert!(matches!(empty_table.validate(), Err(UpdateError::InvalidInput(_))));

        let nested = SchemaChange::Composite {
            changes: vec![
                users_table(),
                SchemaChange::AddUniqueConstraint {
                    table: "t_user".to_string(),
                    columns: vec![],
                },
            ],
        };
        assert!(nested.validate().is_err());
        assert!(users_table().validate().is_ok());
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_schema_change_deserializes_from_tagged_json() {
        let json = r#"{
            "op": "add_column",
            "table": "t_user",
            "column": { "name": "active", "type": "boolean", "nullable": false, "default": "true" }
        }"#;
        let change: SchemaChange = serde_json::from_str(json).expect("deserialize");
        match change {
            SchemaChange::AddColumn { table, column } => {
                assert_eq!(table, "t_user");
                assert_eq!(column.kind, ColumnKind::Boolean);
                assert!(!column.nullable);
                assert_eq!(column.default.as_deref(), Some("true"));
            }
            #[allow(clippy::panic)] // Test code - panic is acceptable
            other => panic!("Expected AddColumn, got {other:?}"),
        }
    }
}
