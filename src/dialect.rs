//! Database dialect support
//!
//! [`DatabaseSupport`] bundles everything that differs between database
//! products: optimised SQL fragments, shutdown commands, identifier quoting,
//! DDL rendering and constraint naming.
//!
//! It is built once at startup from [`UpdaterConfig`](crate::config::UpdaterConfig)
//! and passed to the updater and to any query site that wants a
//! dialect-optimised fragment. There is no global dialect holder.

use crate::update::{ColumnSpec, UpdateError};
use chrono::NaiveDateTime;
use sea_query::{Index, MysqlQueryBuilder, PostgresQueryBuilder, SqliteQueryBuilder, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Database product in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mariadb")]
    MySql,
    Sqlite,
    H2,
    #[serde(alias = "hsqldb")]
    Hsql,
    Derby,
    #[serde(alias = "mssql")]
    SqlServer,
    Oracle,
}

/// `sea-query` backend used to render DDL for a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaBackend {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 8] = [
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::Sqlite,
        Dialect::H2,
        Dialect::Hsql,
        Dialect::Derby,
        Dialect::SqlServer,
        Dialect::Oracle,
    ];

    /// Guess the dialect from a connection URL (`postgres://`, `mysql://`,
    /// `sqlite:`, `jdbc:h2:`, ...)
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.trim().to_ascii_lowercase();
        let scheme = lower.strip_prefix("jdbc:").unwrap_or(&lower);
        let prefixes: [(&str, Dialect); 10] = [
            ("postgresql:", Dialect::Postgres),
            ("postgres:", Dialect::Postgres),
            ("mysql:", Dialect::MySql),
            ("mariadb:", Dialect::MySql),
            ("sqlite:", Dialect::Sqlite),
            ("h2:", Dialect::H2),
            ("hsqldb:", Dialect::Hsql),
            ("derby:", Dialect::Derby),
            ("sqlserver:", Dialect::SqlServer),
            ("oracle:", Dialect::Oracle),
        ];
        prefixes
            .iter()
            .find(|(prefix, _)| scheme.starts_with(prefix))
            .map(|(_, dialect)| *dialect)
    }

    /// Longest identifier the product accepts, if it enforces one
    #[must_use]
    pub fn max_identifier_len(self) -> Option<usize> {
        match self {
            Dialect::Postgres => Some(63),
            Dialect::MySql => Some(64),
            Dialect::Oracle => Some(30),
            Dialect::H2 | Dialect::Hsql | Dialect::Derby | Dialect::SqlServer => Some(128),
            Dialect::Sqlite => None,
        }
    }

    fn schema_backend(self) -> SchemaBackend {
        match self {
            Dialect::MySql => SchemaBackend::MySql,
            Dialect::Sqlite => SchemaBackend::Sqlite,
            // ANSI double-quoted identifiers
            _ => SchemaBackend::Postgres,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::H2 => "h2",
            Dialect::Hsql => "hsql",
            Dialect::Derby => "derby",
            Dialect::SqlServer => "sqlserver",
            Dialect::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            "h2" => Ok(Dialect::H2),
            "hsql" | "hsqldb" => Ok(Dialect::Hsql),
            "derby" => Ok(Dialect::Derby),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "oracle" => Ok(Dialect::Oracle),
            other => Err(UpdateError::InvalidInput(format!("unknown dialect '{other}'"))),
        }
    }
}

const UNIQUE_MARKER: &str = "_uq_";

/// Limits of the unique constraint naming algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintNaming {
    /// Characters of the first column name kept in the base name
    pub column_prefix_len: usize,
    /// Suffixes tried before giving up
    pub max_attempts: u32,
}

impl ConstraintNaming {
    /// Can a full column prefix plus the largest suffix fit `dialect`'s
    /// identifier limit next to at least one table character?
    pub fn fits(&self, dialect: Dialect) -> bool {
        match dialect.max_identifier_len() {
            Some(max) => {
                let suffix_len = self.max_attempts.to_string().len();
                1 + UNIQUE_MARKER.len() + self.column_prefix_len + suffix_len <= max
            }
            None => true,
        }
    }
}

impl Default for ConstraintNaming {
    fn default() -> Self {
        Self {
            column_prefix_len: 8,
            max_attempts: 1000,
        }
    }
}

/// Dialect-specific SQL support, selected once per process
#[derive(Debug)]
pub struct DatabaseSupport {
    dialect: Dialect,
    naming: ConstraintNaming,
    fallback_warned: AtomicBool,
}

macro_rules! build_schema {
    ($backend:expr, $statement:expr) => {
        match $backend {
            SchemaBackend::Postgres => $statement.build(PostgresQueryBuilder),
            SchemaBackend::MySql => $statement.build(MysqlQueryBuilder),
            SchemaBackend::Sqlite => $statement.build(SqliteQueryBuilder),
        }
    };
}

impl DatabaseSupport {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_naming(dialect, ConstraintNaming::default())
    }

    pub fn with_naming(dialect: Dialect, naming: ConstraintNaming) -> Self {
        Self {
            dialect,
            naming,
            fallback_warned: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn naming(&self) -> ConstraintNaming {
        self.naming
    }

    /// Aggregate duration expression `SUM(to - from)` in seconds
    ///
    /// Returns `None` when the dialect has no known optimisation; the caller
    /// then reads the rows and sums them with [`Self::sum_interval_seconds`].
    /// The first fallback is logged as a warning, later ones are silent.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sysupdater::dialect::{DatabaseSupport, Dialect};
    ///
    /// let support = DatabaseSupport::new(Dialect::Postgres);
    /// let sql = support.interval_in_seconds("started_at", "ended_at").unwrap();
    /// assert_eq!(sql, "SUM(EXTRACT(EPOCH FROM ended_at) - EXTRACT(EPOCH FROM started_at))");
    /// ```
    pub fn interval_in_seconds(&self, from_column: &str, to_column: &str) -> Option<String> {
        match self.dialect {
            Dialect::Postgres => Some(format!(
                "SUM(EXTRACT(EPOCH FROM {to_column}) - EXTRACT(EPOCH FROM {from_column}))"
            )),
            Dialect::MySql => Some(format!(
                "SUM(TIMESTAMPDIFF(SECOND, {from_column}, {to_column}))"
            )),
            Dialect::H2 => Some(format!(
                "SUM(DATEDIFF('SECOND', {from_column}, {to_column}))"
            )),
            _ => {
                if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "No optimised interval aggregation for dialect {}; durations are summed in the application",
                        self.dialect
                    );
                }
                None
            }
        }
    }

    /// Whether [`Self::interval_in_seconds`] has already taken the fallback path
    #[must_use]
    pub fn fallback_warning_logged(&self) -> bool {
        self.fallback_warned.load(Ordering::Relaxed)
    }

    /// In-application counterpart of [`Self::interval_in_seconds`]
    pub fn sum_interval_seconds<I>(intervals: I) -> i64
    where
        I: IntoIterator<Item = (NaiveDateTime, NaiveDateTime)>,
    {
        intervals
            .into_iter()
            .map(|(from, to)| (to - from).num_seconds())
            .sum()
    }

    /// Command that shuts the database down cleanly, if the dialect needs one
    #[must_use]
    pub fn shutdown_statement(&self) -> Option<&'static str> {
        match self.dialect {
            Dialect::H2 | Dialect::Hsql => Some("SHUTDOWN"),
            _ => None,
        }
    }

    /// Quote an identifier for the dialect
    #[must_use]
    pub fn quote_identifier(&self, identifier: &str) -> String {
        match self.dialect {
            Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
            _ => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    /// Pick a unique constraint name that does not collide with `existing`
    ///
    /// The base name is `lower(table) + "_uq_" + lower(columns[0])` with the
    /// column part cut to [`ConstraintNaming::column_prefix_len`] characters.
    /// Suffixes `1, 2, ...` are tried in order; names are compared without
    /// regard to case. When the dialect limits identifier length, the table
    /// part is shortened so that the full candidate fits; if that is not
    /// enough the column part is cut as well, keeping one table character.
    ///
    /// # Errors
    ///
    /// - `UpdateError::InvalidInput` if `columns` is empty
    /// - `UpdateError::ConstraintNameExhausted` if every candidate up to
    ///   [`ConstraintNaming::max_attempts`] is taken
    ///
    /// # Example
    ///
    /// ```rust
    /// use sysupdater::dialect::{DatabaseSupport, Dialect};
    ///
    /// let support = DatabaseSupport::new(Dialect::Postgres);
    /// let name = support
    ///     .create_unique_constraint_name(
    ///         "t_MYTABLE",
    ///         &["Tenant_id", "username"],
    ///         ["t_mytable_uq_tenant_i1", "t_mytable_uq_tenant_i2"],
    ///     )
    ///     .unwrap();
    /// assert_eq!(name, "t_mytable_uq_tenant_i3");
    /// ```
    pub fn create_unique_constraint_name<C, E>(
        &self,
        table: &str,
        columns: &[C],
        existing: E,
    ) -> Result<String, UpdateError>
    where
        C: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let first_column = columns.first().ok_or_else(|| {
            UpdateError::InvalidInput(format!(
                "unique constraint on '{table}' needs at least one column"
            ))
        })?;

        let taken: HashSet<String> = existing
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();

        let table_part = table.to_lowercase();
        let column_part: String = first_column
            .as_ref()
            .to_lowercase()
            .chars()
            .take(self.naming.column_prefix_len)
            .collect();

        for suffix in 1..=self.naming.max_attempts {
            let candidate = self.fit_constraint_name(&table_part, &column_part, suffix);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }

        Err(UpdateError::ConstraintNameExhausted {
            base: format!("{table_part}{UNIQUE_MARKER}{column_part}"),
            attempts: self.naming.max_attempts,
        })
    }

    fn fit_constraint_name(&self, table: &str, column: &str, suffix: u32) -> String {
        let suffix = suffix.to_string();
        let table_len = table.chars().count();
        let column_len = column.chars().count();
        let room = match self.dialect.max_identifier_len() {
            Some(max) => max.saturating_sub(UNIQUE_MARKER.len() + suffix.len()),
            None => usize::MAX,
        };
        if table_len + column_len <= room {
            return format!("{table}{UNIQUE_MARKER}{column}{suffix}");
        }

        let column_keep = column_len.min(room.saturating_sub(1));
        let table_keep = room - column_keep;
        let table: String = table.chars().take(table_keep).collect();
        let column: String = column.chars().take(column_keep).collect();
        format!("{table}{UNIQUE_MARKER}{column}{suffix}")
    }

    /// `CREATE TABLE` for the dialect
    pub fn render_create_table(&self, table: &str, columns: &[ColumnSpec]) -> String {
        let mut statement = Table::create();
        statement.table(table.to_string());
        for column in columns {
            let mut def = column.to_column_def();
            statement.col(&mut def);
        }
        build_schema!(self.dialect.schema_backend(), statement)
    }

    /// `ALTER TABLE ... ADD COLUMN` for the dialect
    pub fn render_add_column(&self, table: &str, column: &ColumnSpec) -> String {
        let statement = Table::alter()
            .table(table.to_string())
            .add_column(column.to_column_def())
            .to_owned();
        build_schema!(self.dialect.schema_backend(), statement)
    }

    /// `CREATE [UNIQUE] INDEX` for the dialect
    pub fn render_create_index(&self, table: &str, name: &str, columns: &[String], unique: bool) -> String {
        let mut statement = Index::create();
        statement.name(name.to_string()).table(table.to_string());
        for column in columns {
            statement.col(column.clone());
        }
        if unique {
            statement.unique();
        }
        build_schema!(self.dialect.schema_backend(), statement)
    }

    /// Named unique constraint for the dialect
    ///
    /// SQLite cannot add constraints to an existing table, so a unique index
    /// with the same name is created there instead.
    pub fn render_add_unique_constraint(&self, table: &str, name: &str, columns: &[String]) -> String {
        if self.dialect == Dialect::Sqlite {
            return self.render_create_index(table, name, columns, true);
        }
        let column_list = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.quote_identifier(table),
            self.quote_identifier(name),
            column_list
        )
    }
}
