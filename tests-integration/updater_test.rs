//! Update passes against a live PostgreSQL database
//!
//! Set `SYSUPDATER_TEST_DATABASE_URL` to run these tests; without it they
//! return immediately.
//!
//! Test flow:
//! 1. Register a region with an initial table and two versioned updates
//! 2. Precheck only, nothing is executed
//! 3. Run, every entry applies
//! 4. Run again, every entry reports already updated
//! 5. Verify the schema through the introspector and drop the test table

use std::env;
use std::sync::Arc;
use sysupdater::postgres::PostgresSchema;
use sysupdater::update::{
    ColumnKind, ColumnSpec, PrecheckStatus, SchemaChange, SystemUpdater, UpdateContext,
    UpdateEntry, UpdateRegistry,
};
use sysupdater::{DatabaseSupport, Dialect, SchemaIntrospector, UpdateExecutor};

const TABLE: &str = "sysupdater_it_contact";

fn database_url() -> Option<String> {
    env::var("SYSUPDATER_TEST_DATABASE_URL").ok()
}

#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn registry() -> UpdateRegistry {
    let mut registry = UpdateRegistry::new();
    registry
        .register(
            UpdateEntry::initial("it_crm", "2024-01-15", "Contacts"),
            Arc::new(SchemaChange::CreateTable {
                table: TABLE.to_string(),
                columns: vec![
                    ColumnSpec::new("id", ColumnKind::BigInteger).primary_key(),
                    ColumnSpec::new("tenant_id", ColumnKind::BigInteger).not_null(),
                    ColumnSpec::new("name", ColumnKind::String).length(255),
                ],
            }),
        )
        .expect("initial");
    registry
        .register(
            UpdateEntry::versioned("it_crm", "1.1", "2024-02-01", "Contact email")
                .expect("version"),
            Arc::new(SchemaChange::AddColumn {
                table: TABLE.to_string(),
                column: ColumnSpec::new("email", ColumnKind::String).length(255),
            }),
        )
        .expect("1.1");
    registry
        .register(
            UpdateEntry::versioned("it_crm", "1.2", "2024-03-01", "Unique email per tenant")
                .expect("version"),
            Arc::new(SchemaChange::AddUniqueConstraint {
                table: TABLE.to_string(),
                columns: vec!["tenant_id".to_string(), "email".to_string()],
            }),
        )
        .expect("1.2");
    registry
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_update_lifecycle() {
    let Some(url) = database_url() else {
        eprintln!("SYSUPDATER_TEST_DATABASE_URL not set; skipping");
        return;
    };

    let schema = Arc::new(PostgresSchema::connect(&url).expect("Failed to connect"));
    schema
        .execute_batch(&[format!("DROP TABLE IF EXISTS {TABLE}")])
        .expect("Failed to drop leftover table");

    let ctx = UpdateContext::new(
        schema.clone(),
        schema.clone(),
        Arc::new(DatabaseSupport::new(Dialect::Postgres)),
    );
    let mut updater = SystemUpdater::new(registry());

    let status = updater.precheck_all(&ctx);
    assert_eq!(status.count_precheck(PrecheckStatus::ReadyForUpdate), 3);
    assert!(!schema.table_exists(TABLE).expect("introspect"));

    let report = updater.run_all(&ctx);
    assert_eq!(report.succeeded(), 3, "{}", report.to_json().unwrap_or_default());
    assert!(schema.column_exists(TABLE, "email").expect("introspect"));
    assert!(schema
        .unique_constraint_exists(TABLE, &["email".to_string(), "tenant_id".to_string()])
        .expect("introspect"));
    assert!(schema
        .constraint_names(TABLE)
        .expect("introspect")
        .contains(&format!("{TABLE}_uq_tenant_i1")));

    let rerun = updater.run_all(&ctx);
    assert!(rerun.is_up_to_date());
    assert_eq!(rerun.already_updated(), 3);

    schema
        .execute_batch(&[format!("DROP TABLE {TABLE}")])
        .expect("Failed to drop test table");
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_failed_batch_rolls_back() {
    let Some(url) = database_url() else {
        return;
    };

    let schema = PostgresSchema::connect(&url).expect("Failed to connect");
    let table = format!("{TABLE}_rollback");
    let result = schema.execute_batch(&[
        format!("CREATE TABLE {table} (id BIGINT PRIMARY KEY)"),
        "THIS IS NOT SQL".to_string(),
    ]);
    assert!(result.is_err());
    assert!(!schema.table_exists(&table).expect("introspect"));
}
