//! Update passes through the public API against the in-memory schema

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sysupdater::test_helpers::InMemorySchema;
use sysupdater::update::{
    ColumnKind, ColumnSpec, FnUpdate, PrecheckStatus, RunStatus, SchemaChange, SystemUpdater,
    UpdateContext, UpdateContributor, UpdateEntry, UpdateError, UpdateRegistry, UpdateUnit, Version,
};
use sysupdater::{DatabaseSupport, Dialect, SchemaIntrospector};

fn context(schema: &Arc<InMemorySchema>) -> UpdateContext {
    UpdateContext::new(
        schema.clone(),
        schema.clone(),
        Arc::new(DatabaseSupport::new(Dialect::Postgres)),
    )
}

#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn orders_registry() -> UpdateRegistry {
    let mut registry = UpdateRegistry::new();
    registry
        .register(
            UpdateEntry::initial("orders", "2024-01-10", "Order table"),
            Arc::new(SchemaChange::CreateTable {
                table: "t_order".to_string(),
                columns: vec![
                    ColumnSpec::new("id", ColumnKind::BigInteger).primary_key(),
                    ColumnSpec::new("customer_id", ColumnKind::BigInteger).not_null(),
                ],
            }),
        )
        .expect("initial");
    registry
        .register(
            UpdateEntry::versioned("orders", "1.2", "2024-04-01", "Order status")
                .expect("version"),
            Arc::new(SchemaChange::AddColumn {
                table: "t_order".to_string(),
                column: ColumnSpec::new("status", ColumnKind::String).length(32),
            }),
        )
        .expect("1.2");
    registry
        .register(
            UpdateEntry::versioned("orders", "1.1", "2024-02-01", "Customer index")
                .expect("version"),
            Arc::new(SchemaChange::CreateIndex {
                table: "t_order".to_string(),
                name: "idx_order_customer".to_string(),
                columns: vec!["customer_id".to_string()],
                unique: false,
            }),
        )
        .expect("1.1");
    registry
}

#[test]
fn test_fresh_database_then_rerun_is_noop() {
    let schema = Arc::new(InMemorySchema::new());
    let ctx = context(&schema);
    let mut updater = SystemUpdater::new(orders_registry());

    let first = updater.run_all(&ctx);
    assert_eq!(first.succeeded(), 3);
    assert!(!first.should_abort_startup());
    let batches = schema.executed_batches();
    assert_eq!(batches, 3);

    let second = updater.run_all(&ctx);
    assert!(second.is_up_to_date());
    assert_eq!(second.count_run(RunStatus::NotRun), 3);
    assert_eq!(schema.executed_batches(), batches);
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_existing_installation_only_applies_missing_updates() {
    let schema = Arc::new(InMemorySchema::new());
    schema.add_table("t_order", &["id", "customer_id"]);

    let report = SystemUpdater::new(orders_registry()).run_all(&context(&schema));

    let statuses: Vec<_> = report.entries.iter().map(|e| (e.precheck, e.run)).collect();
    assert_eq!(
        statuses,
        vec![
            (PrecheckStatus::AlreadyUpdated, RunStatus::NotRun),
            (PrecheckStatus::ReadyForUpdate, RunStatus::Success),
            (PrecheckStatus::ReadyForUpdate, RunStatus::Success),
        ]
    );
    assert!(schema
        .index_exists("t_order", "idx_order_customer")
        .expect("introspect"));
    assert!(schema.columns("t_order").contains(&"status".to_string()));
}

#[test]
fn test_failed_update_is_retried_on_next_pass() {
    let schema = Arc::new(InMemorySchema::new());
    schema.fail_statements_matching("idx_order_customer");
    let mut updater = SystemUpdater::new(orders_registry());

    let first = updater.run_all(&context(&schema));
    assert_eq!(first.succeeded(), 1);
    assert_eq!(first.failed(), 1);
    assert_eq!(first.skipped(), 1);
    assert!(first.should_abort_startup());
    assert!(!schema.columns("t_order").contains(&"status".to_string()));

    let healthy = Arc::new(InMemorySchema::new());
    healthy.add_table("t_order", &["id", "customer_id"]);
    let second = updater.run_all(&context(&healthy));
    assert_eq!(second.already_updated(), 1);
    assert_eq!(second.succeeded(), 2);
    assert!(second.entries.iter().all(|e| e.message.is_none()));
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_custom_action_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut registry = orders_registry();
    registry
        .register(
            UpdateEntry::versioned("orders", "1.3", "2024-05-01", "Backfill status")
                .expect("version"),
            Arc::new(FnUpdate::new(
                |ctx| {
                    ctx.introspector()
                        .column_exists("t_order", "status_backfilled")
                },
                move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![
                        "ALTER TABLE t_order ADD COLUMN status_backfilled BOOLEAN".to_string(),
                    ])
                },
            )),
        )
        .expect("1.3");

    let schema = Arc::new(InMemorySchema::new());
    let ctx = context(&schema);
    let mut updater = SystemUpdater::new(registry);
    assert_eq!(updater.run_all(&ctx).succeeded(), 4);
    assert!(updater.run_all(&ctx).is_up_to_date());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_duplicate_version_is_rejected() {
    let mut registry = orders_registry();
    let result = registry.register(
        UpdateEntry::versioned("orders", "1.1.0", "2024-06-01", "Same version again")
            .expect("version"),
        Arc::new(SchemaChange::AddColumn {
            table: "t_order".to_string(),
            column: ColumnSpec::new("note", ColumnKind::Text),
        }),
    );
    assert!(matches!(result, Err(UpdateError::RegistrationConflict { .. })));
    assert_eq!(registry.len(), 3);
}

struct AuditRegion;

impl UpdateContributor for AuditRegion {
    fn region_id(&self) -> &str {
        "audit"
    }

    fn initialization_update(&self) -> Option<UpdateUnit> {
        Some(UpdateUnit::new(
            UpdateEntry::initial("audit", "2024-01-20", "Audit log"),
            SchemaChange::CreateTable {
                table: "t_audit".to_string(),
                columns: vec![
                    ColumnSpec::new("id", ColumnKind::BigInteger).primary_key(),
                    ColumnSpec::new("order_id", ColumnKind::BigInteger),
                ],
            },
        ))
    }

    fn updates(&self) -> Vec<UpdateUnit> {
        vec![UpdateUnit::new(
            UpdateEntry::with_version(
                "audit",
                Version::new(1, 1),
                "2024-02-20",
                "One audit row per order",
            ),
            SchemaChange::AddUniqueConstraint {
                table: "t_audit".to_string(),
                columns: vec!["order_id".to_string()],
            },
        )]
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["orders".to_string()]
    }
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_contributor_region_runs_after_its_dependency() {
    let mut registry = UpdateRegistry::new();
    let outcome = registry.register_contributor(&AuditRegion);
    assert!(outcome.is_clean());
    assert_eq!(outcome.accepted, 2);
    for unit in UpdateUnitSource::orders() {
        registry.register_unit(unit).expect("orders");
    }

    let order: Vec<String> = registry.execution_order().iter().map(|e| e.label()).collect();
    assert_eq!(order, vec!["orders@initial", "audit@initial", "audit@1.1"]);

    let schema = Arc::new(InMemorySchema::new());
    let report = SystemUpdater::new(registry).run_all(&context(&schema));
    assert_eq!(report.succeeded(), 3);
    assert_eq!(
        schema.constraint_names("t_audit").expect("introspect"),
        vec!["t_audit_uq_order_id1".to_string()]
    );
}

struct UpdateUnitSource;

impl UpdateUnitSource {
    fn orders() -> Vec<UpdateUnit> {
        vec![UpdateUnit::new(
            UpdateEntry::initial("orders", "2024-01-10", "Order table"),
            SchemaChange::CreateTable {
                table: "t_order".to_string(),
                columns: vec![ColumnSpec::new("id", ColumnKind::BigInteger).primary_key()],
            },
        )]
    }
}
