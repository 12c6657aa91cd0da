//! Test support: an in-memory schema
//!
//! [`InMemorySchema`] implements both collaborator traits over a small
//! in-memory model of tables, columns, indexes and unique constraints. It
//! understands the DDL that [`DatabaseSupport`](crate::dialect::DatabaseSupport)
//! renders (double-quoted, backquoted or bare identifiers) and applies each
//! batch atomically. Failures and slow batches can be injected.

use crate::executor::{DbError, SchemaIntrospector, UpdateExecutor};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const IDENT: &str = r#"("[^"]+"|`[^`]+`|[\w$]+)"#;

#[allow(clippy::expect_used)] // Constant patterns, covered by tests
static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?{IDENT}\s*\((.*)\)\s*;?\s*$"
    ))
    .expect("create table pattern")
});

#[allow(clippy::expect_used)] // Constant patterns, covered by tests
static ADD_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*ALTER\s+TABLE\s+{IDENT}\s+ADD\s+(?:COLUMN\s+)?(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}"
    ))
    .expect("add column pattern")
});

#[allow(clippy::expect_used)] // Constant patterns, covered by tests
static ADD_UNIQUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*ALTER\s+TABLE\s+{IDENT}\s+ADD\s+CONSTRAINT\s+{IDENT}\s+UNIQUE\s*\((.*)\)"
    ))
    .expect("add constraint pattern")
});

#[allow(clippy::expect_used)] // Constant patterns, covered by tests
static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*CREATE\s+(UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}\s+ON\s+{IDENT}\s*\((.*)\)"
    ))
    .expect("create index pattern")
});

#[derive(Debug, Clone, Default)]
struct TableState {
    columns: Vec<String>,
    /// (name, columns, unique)
    indexes: Vec<(String, Vec<String>, bool)>,
    /// Unique constraints: (name, columns)
    constraints: Vec<(String, Vec<String>)>,
}

impl TableState {
    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

type Tables = BTreeMap<String, TableState>;

/// In-memory [`SchemaIntrospector`] + [`UpdateExecutor`]
#[derive(Debug, Default)]
pub struct InMemorySchema {
    tables: Mutex<Tables>,
    executed: Mutex<Vec<String>>,
    batches: AtomicUsize,
    fail_patterns: Mutex<Vec<String>>,
    introspection_failure: Mutex<Option<String>>,
    batch_delay: Mutex<Option<Duration>>,
    concurrent: AtomicBool,
}

impl InMemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report support for concurrent batches (parallel regions)
    #[must_use]
    pub fn with_concurrent_batches(self) -> Self {
        self.concurrent.store(true, Ordering::Relaxed);
        self
    }

    pub fn add_table(&self, table: &str, columns: &[&str]) {
        let state = TableState {
            columns: columns.iter().map(|c| normalize(c)).collect(),
            ..TableState::default()
        };
        lock(&self.tables).insert(normalize(table), state);
    }

    pub fn add_column(&self, table: &str, column: &str) {
        if let Some(state) = lock(&self.tables).get_mut(&normalize(table)) {
            state.columns.push(normalize(column));
        }
    }

    pub fn add_constraint(&self, table: &str, name: &str, columns: &[&str]) {
        if let Some(state) = lock(&self.tables).get_mut(&normalize(table)) {
            state
                .constraints
                .push((normalize(name), columns.iter().map(|c| normalize(c)).collect()));
        }
    }

    pub fn has_table(&self, table: &str) -> bool {
        lock(&self.tables).contains_key(&normalize(table))
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        lock(&self.tables)
            .get(&normalize(table))
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Make every statement containing `pattern` fail
    pub fn fail_statements_matching(&self, pattern: &str) {
        lock(&self.fail_patterns).push(pattern.to_string());
    }

    /// Make every introspection call fail with `message`
    pub fn fail_introspection(&self, message: &str) {
        *lock(&self.introspection_failure) = Some(message.to_string());
    }

    /// Sleep before each batch
    pub fn set_batch_delay(&self, delay: Duration) {
        *lock(&self.batch_delay) = Some(delay);
    }

    /// Number of committed batches
    pub fn executed_batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Every statement of every committed batch, in order
    pub fn executed_statements(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// Apply statements atomically without going through a batch count
    pub fn execute_all(&self, statements: &[String]) -> Result<(), DbError> {
        let mut tables = lock(&self.tables);
        let mut staged = tables.clone();
        for statement in statements {
            self.check_injected_failure(statement)?;
            apply_statement(&mut staged, statement)?;
        }
        *tables = staged;
        lock(&self.executed).extend(statements.iter().cloned());
        Ok(())
    }

    fn check_injected_failure(&self, statement: &str) -> Result<(), DbError> {
        if lock(&self.fail_patterns)
            .iter()
            .any(|p| statement.contains(p.as_str()))
        {
            return Err(DbError::QueryError(format!("injected failure: {statement}")));
        }
        Ok(())
    }

    fn introspect<T>(&self, read: impl FnOnce(&Tables) -> T) -> Result<T, DbError> {
        if let Some(message) = lock(&self.introspection_failure).as_ref() {
            return Err(DbError::Other(message.clone()));
        }
        Ok(read(&lock(&self.tables)))
    }
}

impl SchemaIntrospector for InMemorySchema {
    fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        self.introspect(|tables| tables.contains_key(&normalize(table)))
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool, DbError> {
        self.introspect(|tables| {
            tables
                .get(&normalize(table))
                .is_some_and(|t| t.has_column(&normalize(column)))
        })
    }

    fn index_exists(&self, table: &str, index: &str) -> Result<bool, DbError> {
        let index = normalize(index);
        self.introspect(|tables| {
            tables.get(&normalize(table)).is_some_and(|t| {
                t.indexes.iter().any(|(name, _, _)| *name == index)
                    || t.constraints.iter().any(|(name, _)| *name == index)
            })
        })
    }

    fn constraint_names(&self, table: &str) -> Result<Vec<String>, DbError> {
        self.introspect(|tables| {
            tables
                .get(&normalize(table))
                .map(|t| {
                    t.constraints
                        .iter()
                        .map(|(name, _)| name.clone())
                        .chain(t.indexes.iter().map(|(name, _, _)| name.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn unique_constraint_exists(&self, table: &str, columns: &[String]) -> Result<bool, DbError> {
        let wanted = sorted(columns.iter().map(|c| normalize(c)).collect());
        self.introspect(|tables| {
            tables.get(&normalize(table)).is_some_and(|t| {
                t.constraints
                    .iter()
                    .map(|(_, cols)| cols)
                    .chain(t.indexes.iter().filter(|(_, _, u)| *u).map(|(_, cols, _)| cols))
                    .any(|cols| sorted(cols.clone()) == wanted)
            })
        })
    }
}

impl UpdateExecutor for InMemorySchema {
    fn execute_batch(&self, statements: &[String]) -> Result<(), DbError> {
        let delay = *lock(&self.batch_delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.execute_all(statements)?;
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn supports_concurrent_batches(&self) -> bool {
        self.concurrent.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize(identifier: &str) -> String {
    identifier
        .trim()
        .trim_matches(|c| c == '"' || c == '`')
        .to_lowercase()
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

/// Column names of an index or constraint column list
///
/// Parenthesised key parts such as `("email")` count as the plain column.
fn column_list(list: &str) -> Vec<String> {
    split_top_level(list)
        .into_iter()
        .map(|part| normalize(part.trim().trim_start_matches('(').trim_end_matches(')')))
        .filter(|c| !c.is_empty())
        .collect()
}

/// Split a column definition list on commas outside parentheses
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn missing_table(table: &str) -> DbError {
    DbError::QueryError(format!("relation \"{table}\" does not exist"))
}

fn apply_statement(tables: &mut Tables, statement: &str) -> Result<(), DbError> {
    if let Some(caps) = CREATE_TABLE.captures(statement) {
        let if_not_exists = caps.get(1).is_some();
        let table = normalize(&caps[2]);
        if tables.contains_key(&table) {
            if if_not_exists {
                return Ok(());
            }
            return Err(DbError::QueryError(format!("relation \"{table}\" already exists")));
        }
        let mut state = TableState::default();
        for part in split_top_level(&caps[3]) {
            let part = part.trim();
            let first = part.split_whitespace().next().unwrap_or_default();
            let keyword = first.to_ascii_uppercase();
            if first.is_empty()
                || ["PRIMARY", "UNIQUE", "CONSTRAINT", "FOREIGN", "CHECK"].contains(&keyword.as_str())
            {
                continue;
            }
            state.columns.push(normalize(first));
        }
        tables.insert(table, state);
        return Ok(());
    }

    if let Some(caps) = ADD_UNIQUE.captures(statement) {
        let table = normalize(&caps[1]);
        let state = tables.get_mut(&table).ok_or_else(|| missing_table(&table))?;
        let name = normalize(&caps[2]);
        if state.constraints.iter().any(|(n, _)| *n == name) {
            return Err(DbError::QueryError(format!("constraint \"{name}\" already exists")));
        }
        state.constraints.push((name, column_list(&caps[3])));
        return Ok(());
    }

    if let Some(caps) = ADD_COLUMN.captures(statement) {
        let table = normalize(&caps[1]);
        let state = tables.get_mut(&table).ok_or_else(|| missing_table(&table))?;
        let column = normalize(&caps[2]);
        if state.has_column(&column) {
            return Err(DbError::QueryError(format!("column \"{column}\" already exists")));
        }
        state.columns.push(column);
        return Ok(());
    }

    if let Some(caps) = CREATE_INDEX.captures(statement) {
        let unique = caps.get(1).is_some();
        let name = normalize(&caps[2]);
        let table = normalize(&caps[3]);
        let state = tables.get_mut(&table).ok_or_else(|| missing_table(&table))?;
        if state.indexes.iter().any(|(n, _, _)| *n == name) {
            return Err(DbError::QueryError(format!("relation \"{name}\" already exists")));
        }
        state.indexes.push((name, column_list(&caps[4]), unique));
        return Ok(());
    }

    // Anything else (DML, comments, vendor commands) leaves the schema model unchanged
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(statements: &[&str]) -> Vec<String> {
        statements.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_applies_rendered_ddl() {
        let schema = InMemorySchema::new();
        schema
            .execute_batch(&strings(&[
                r#"CREATE TABLE "t_user" ( "id" bigint NOT NULL PRIMARY KEY, "amount" decimal(10, 2) NULL )"#,
                r#"ALTER TABLE "t_user" ADD COLUMN "email" varchar(255) NULL"#,
                r#"CREATE UNIQUE INDEX "idx_user_email" ON "t_user" ("email")"#,
                "ALTER TABLE `t_user` ADD CONSTRAINT `t_user_uq_id1` UNIQUE (`id`, `email`)",
            ]))
            .expect("batch");

        assert_eq!(schema.columns("t_user"), vec!["id", "amount", "email"]);
        assert!(schema.index_exists("T_USER", "idx_user_email").expect("introspect"));
        assert!(schema
            .unique_constraint_exists("t_user", &["email".to_string(), "id".to_string()])
            .expect("introspect"));
        assert_eq!(
            schema.constraint_names("t_user").expect("introspect"),
            vec!["t_user_uq_id1", "idx_user_email"]
        );
        assert_eq!(schema.executed_batches(), 1);
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_applies_ddl_rendered_for_every_dialect() {
        use crate::dialect::{DatabaseSupport, Dialect};
        use crate::update::{ColumnKind, ColumnSpec};

        for dialect in Dialect::ALL {
            let support = DatabaseSupport::new(dialect);
            let schema = InMemorySchema::new();
            schema
                .execute_batch(&[
                    support.render_create_table(
                        "t_user",
                        &[
                            ColumnSpec::new("id", ColumnKind::BigInteger).primary_key(),
                            ColumnSpec::new("tenant_id", ColumnKind::BigInteger).not_null(),
                            ColumnSpec::new("name", ColumnKind::String).length(64),
                        ],
                    ),
                    support.render_add_column(
                        "t_user",
                        &ColumnSpec::new("email", ColumnKind::String).length(255),
                    ),
                    support.render_create_index("t_user", "idx_user_name", &["name".to_string()], false),
                    support.render_add_unique_constraint(
                        "t_user",
                        "t_user_uq_tenant_i1",
                        &["tenant_id".to_string(), "email".to_string()],
                    ),
                ])
                .expect("batch");

            assert_eq!(
                schema.columns("t_user"),
                vec!["id", "tenant_id", "name", "email"],
                "{dialect}"
            );
            assert!(schema.index_exists("t_user", "idx_user_name").expect("introspect"));
            assert!(
                schema
                    .unique_constraint_exists("t_user", &["email".to_string(), "tenant_id".to_string()])
                    .expect("introspect"),
                "{dialect}"
            );
            assert!(!schema
                .unique_constraint_exists("t_user", &["name".to_string()])
                .expect("introspect"));
            assert!(schema
                .constraint_names("t_user")
                .expect("introspect")
                .contains(&"t_user_uq_tenant_i1".to_string()));
        }
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_parenthesised_index_columns() {
        let schema = InMemorySchema::new();
        schema
            .execute_batch(&strings(&[
                "CREATE TABLE t_user (id INTEGER, email TEXT)",
                r#"CREATE UNIQUE INDEX "idx_email" ON "t_user" (("email"))"#,
            ]))
            .expect("batch");
        assert!(schema
            .unique_constraint_exists("t_user", &["email".to_string()])
            .expect("introspect"));
    }

    #[test]
    fn test_failed_batch_leaves_no_partial_state() {
        let schema = InMemorySchema::new();
        let result = schema.execute_batch(&strings(&[
            "CREATE TABLE t_a (id INTEGER)",
            "ALTER TABLE t_missing ADD COLUMN x INTEGER",
        ]));
        assert!(result.is_err());
        assert!(!schema.has_table("t_a"));
        assert_eq!(schema.executed_batches(), 0);
        assert!(schema.executed_statements().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let schema = InMemorySchema::new();
        schema.fail_statements_matching("t_bad");
        assert!(schema.execute_batch(&strings(&["CREATE TABLE t_bad (id INTEGER)"])).is_err());
        assert!(schema.execute_batch(&strings(&["CREATE TABLE t_good (id INTEGER)"])).is_ok());

        schema.fail_introspection("permission denied");
        assert!(schema.table_exists("t_good").is_err());
    }
}
