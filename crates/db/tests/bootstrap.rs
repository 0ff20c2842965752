use std::sync::Arc;
use std::time::Duration;

use licenses_db::memory::Directive;
use licenses_db::{
    bootstrap, drop_tenant, list_tenants, provision_tenant, BootstrapError, BootstrapPlan,
    BootstrapState, Bootstrapper, ExecutionContext, MemoryEngine,
};
use licenses_kernel::{
    ColumnDeclaration, ColumnShape, ColumnType, Module, ModuleRegistry, Namespace, RowValues,
    Seed, SeedValue, Settings, TableDeclaration, TableScope,
};

struct Catalog;

impl Module for Catalog {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn tables(&self) -> Vec<TableDeclaration> {
        let mut tables = shared_tables();
        tables.push(
            TableDeclaration::new("roles", TableScope::Tenant)
                .column(ColumnDeclaration::serial_id("id"))
                .column(ColumnDeclaration::new("name", ColumnType::Text).not_null().unique()),
        );
        tables
    }

    fn seeds(&self) -> Vec<Seed> {
        vec![Seed::new("roles", TableScope::Tenant, "name")
            .row(vec![("name", SeedValue::text("admin"))])
            .row(vec![("name", SeedValue::text("user"))])]
    }
}

fn shared_tables() -> Vec<TableDeclaration> {
    vec![
        TableDeclaration::new("licenses", TableScope::Shared)
            .column(ColumnDeclaration::serial_id("id"))
            .column(
                ColumnDeclaration::new("license_key", ColumnType::Varchar(64))
                    .not_null()
                    .unique(),
            ),
        TableDeclaration::new("license_events", TableScope::Shared)
            .column(ColumnDeclaration::serial_id("id"))
            .column(
                ColumnDeclaration::new("license_id", ColumnType::Integer)
                    .not_null()
                    .references("licenses", "id"),
            ),
        TableDeclaration::new("clients", TableScope::Shared)
            .column(ColumnDeclaration::serial_id("id"))
            .column(ColumnDeclaration::new("name", ColumnType::Text)),
    ]
}

fn settings(schema: &str, create_schema: bool) -> Settings {
    let mut settings = Settings::default();
    settings.database.schema = schema.to_string();
    settings.database.create_schema = create_schema;
    settings
}

async fn context(engine: MemoryEngine, settings: Settings) -> ExecutionContext<MemoryEngine> {
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(Catalog));
    ExecutionContext::new(settings, registry, engine).await.unwrap()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test]
async fn fresh_database_gets_every_declared_table() {
    let engine = MemoryEngine::new();
    let ctx = context(engine.clone(), settings("public", false)).await;

    let report = bootstrap(&ctx).await.unwrap();

    assert_eq!(report.created, vec!["licenses", "license_events", "clients"]);
    assert!(report.existing.is_empty());
    assert!(report.to_string().contains("public"));
    assert_eq!(
        engine.tables("public"),
        vec!["clients", "license_events", "licenses"]
    );
}

#[tokio::test]
async fn second_run_is_a_noop() {
    let engine = MemoryEngine::new();
    let ctx = context(engine.clone(), settings("public", false)).await;

    bootstrap(&ctx).await.unwrap();
    engine.clear_journal();

    let report = bootstrap(&ctx).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(sorted(report.existing), vec!["clients", "license_events", "licenses"]);
    assert!(!engine
        .journal()
        .iter()
        .any(|d| matches!(d, Directive::CreateTable { .. })));
    assert_eq!(engine.tables("public").len(), 3);
}

#[tokio::test]
async fn correctly_shaped_tables_execute_no_ddl() {
    let engine = shared_tables()
        .iter()
        .fold(MemoryEngine::new(), |engine, table| {
            engine.with_table("public", table)
        });
    let ctx = context(engine.clone(), settings("public", false)).await;

    let report = bootstrap(&ctx).await.unwrap();

    assert!(report.created.is_empty());
    assert_eq!(report.existing.len(), 3);
    assert!(!engine
        .journal()
        .iter()
        .any(|d| matches!(d, Directive::CreateTable { .. } | Directive::CreateNamespace(_))));
}

#[tokio::test]
async fn unreachable_database_creates_nothing() {
    let engine = MemoryEngine::unreachable();
    let ctx = context(engine.clone(), settings("public", false)).await;

    let err = bootstrap(&ctx).await.unwrap_err();

    assert!(err.is_connection());
    assert!(err.to_string().contains("connection refused"));
    assert!(engine.tables("public").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_runs_create_each_table_once() {
    let engine = MemoryEngine::with_latency(Duration::from_millis(5));
    let ctx_a = context(engine.clone(), settings("licensing", true)).await;
    let ctx_b = context(engine.clone(), settings("licensing", true)).await;

    let a = tokio::spawn(async move { bootstrap(&ctx_a).await });
    let b = tokio::spawn(async move { bootstrap(&ctx_b).await });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    let mut created = a.created.clone();
    created.extend(b.created.clone());
    assert_eq!(
        sorted(created),
        vec!["clients", "license_events", "licenses"]
    );
    assert!(a.created.is_empty() || b.created.is_empty());
    assert!(a.namespace_created != b.namespace_created);
    assert_eq!(engine.tables("licensing").len(), 3);

    // The second run got the lock only after the first one committed.
    let journal = engine.journal();
    let locks: Vec<usize> = journal
        .iter()
        .enumerate()
        .filter(|(_, d)| matches!(d, Directive::Lock(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(locks.len(), 2);
    assert!(journal[locks[0]..locks[1]].contains(&Directive::Commit));
    assert!(!journal.contains(&Directive::Rollback));
}

#[tokio::test]
async fn tables_land_in_configured_namespace_only() {
    let engine = MemoryEngine::new().with_namespace("licensing");
    let ctx = context(engine.clone(), settings("licensing", false)).await;

    let report = bootstrap(&ctx).await.unwrap();

    assert_eq!(report.namespace.as_str(), "licensing");
    assert_eq!(engine.tables("licensing").len(), 3);
    assert!(engine.tables("public").is_empty());
}

#[tokio::test]
async fn namespace_is_selected_before_any_table_is_created() {
    let engine = MemoryEngine::new().with_namespace("licensing");
    let ctx = context(engine.clone(), settings("licensing", false)).await;

    bootstrap(&ctx).await.unwrap();

    let journal = engine.journal();
    let select = journal
        .iter()
        .position(|d| *d == Directive::SelectNamespace("licensing".to_string()))
        .expect("namespace selected");
    let first_create = journal
        .iter()
        .position(|d| matches!(d, Directive::CreateTable { .. }))
        .expect("tables created");
    let commit = journal
        .iter()
        .position(|d| *d == Directive::Commit)
        .expect("committed");

    assert!(select < first_create);
    assert!(first_create < commit);
    assert!(journal.iter().all(|d| match d {
        Directive::CreateTable { namespace, .. } => namespace == "licensing",
        _ => true,
    }));
}

#[tokio::test]
async fn missing_namespace_fails_without_creating_tables() {
    let engine = MemoryEngine::new();
    let ctx = context(engine.clone(), settings("licensing", false)).await;

    let err = bootstrap(&ctx).await.unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::Namespace { ref namespace, .. } if namespace == "licensing"
    ));
    assert!(!engine.has_namespace("licensing"));
    assert!(engine.tables("public").is_empty());
    assert_eq!(engine.journal().last(), Some(&Directive::Rollback));
}

#[tokio::test]
async fn missing_namespace_is_created_when_allowed() {
    let engine = MemoryEngine::new();
    let ctx = context(engine.clone(), settings("licensing", true)).await;

    let report = bootstrap(&ctx).await.unwrap();

    assert!(report.namespace_created);
    assert!(engine.has_namespace("licensing"));
    assert_eq!(engine.tables("licensing").len(), 3);
}

#[tokio::test]
async fn invalid_namespace_is_rejected_before_connecting() {
    let engine = MemoryEngine::new();
    let ctx = context(engine.clone(), settings("public; drop", false)).await;

    let err = bootstrap(&ctx).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Namespace { .. }));
    assert!(engine.journal().is_empty());
}

#[tokio::test]
async fn conflict_partway_rolls_back_everything() {
    let tables: Vec<TableDeclaration> = (1..=5)
        .map(|i| {
            let name: &'static str = ["t1", "t2", "t3", "t4", "t5"][i - 1];
            TableDeclaration::new(name, TableScope::Shared)
                .column(ColumnDeclaration::serial_id("id"))
                .column(ColumnDeclaration::new("label", ColumnType::Text).not_null())
        })
        .collect();
    let engine = MemoryEngine::new().with_columns(
        "public",
        "t3",
        vec![
            ColumnShape::new("id", "integer", false),
            ColumnShape::new("label", "integer", false),
        ],
    );

    let plan = BootstrapPlan::new(Namespace::public(), tables);
    let mut bootstrapper = Bootstrapper::new(&engine);
    let err = bootstrapper.run(&plan).await.unwrap_err();

    assert!(err.is_schema_conflict());
    assert!(err.to_string().contains("public.t3"));
    assert_eq!(bootstrapper.state(), BootstrapState::Failed);
    assert_eq!(engine.tables("public"), vec!["t3"]);
    assert!(!engine.journal().contains(&Directive::Commit));
}

#[tokio::test]
async fn view_with_declared_name_is_a_conflict() {
    let engine = MemoryEngine::new().with_relation("public", "clients", "view");
    let ctx = context(engine.clone(), settings("public", false)).await;

    let err = bootstrap(&ctx).await.unwrap_err();

    match err {
        BootstrapError::SchemaConflict { table, detail, .. } => {
            assert_eq!(table, "clients");
            assert!(detail.contains("view"));
        }
        other => panic!("expected schema conflict, got {other}"),
    }
    assert!(engine.tables("public").is_empty());
}

#[tokio::test]
async fn successful_run_reaches_committed() {
    let engine = MemoryEngine::new();
    let plan = BootstrapPlan::new(Namespace::public(), shared_tables());
    let mut bootstrapper = Bootstrapper::new(&engine);
    assert_eq!(bootstrapper.state(), BootstrapState::NotStarted);

    bootstrapper.run(&plan).await.unwrap();
    assert_eq!(bootstrapper.state(), BootstrapState::Committed);
}

#[tokio::test]
async fn tenant_lifecycle() {
    let engine = MemoryEngine::new();
    let ctx = context(engine.clone(), settings("public", false)).await;

    let report = provision_tenant(&ctx, "AB12-CD34").await.unwrap();
    assert!(report.namespace_created);
    assert_eq!(report.namespace.as_str(), "tenant_ab12_cd34");
    assert_eq!(report.created, vec!["roles"]);
    assert_eq!(report.seeded_rows, 2);
    assert_eq!(
        engine.column_values("tenant_ab12_cd34", "roles", "name"),
        vec!["admin", "user"]
    );
    assert!(engine.tables("public").is_empty());

    let again = provision_tenant(&ctx, "AB12-CD34").await.unwrap();
    assert!(again.is_noop());

    provision_tenant(&ctx, "ZZ99-0000").await.unwrap();
    assert_eq!(
        list_tenants(&ctx).await.unwrap(),
        vec!["AB12-CD34", "ZZ99-0000"]
    );

    assert!(drop_tenant(&ctx, "AB12-CD34").await.unwrap());
    assert!(!drop_tenant(&ctx, "AB12-CD34").await.unwrap());
    assert_eq!(list_tenants(&ctx).await.unwrap(), vec!["ZZ99-0000"]);
}

async fn app_context(engine: MemoryEngine) -> ExecutionContext<MemoryEngine> {
    let mut registry = ModuleRegistry::new();
    licenses_app::modules::register_all(&mut registry);
    ExecutionContext::new(settings("public", false), registry, engine)
        .await
        .unwrap()
}

fn license_row(key: &'static str, username: Option<&'static str>) -> RowValues {
    vec![
        ("license_key", SeedValue::text(key)),
        ("client_name", SeedValue::text("Owner Name")),
        ("client_company", SeedValue::text("acme")),
        ("client_email", SeedValue::text("")),
        ("admin_username", username.map_or(SeedValue::Null, SeedValue::text)),
        ("admin_password_hash", SeedValue::text("pbkdf2:sha256$hash")),
    ]
}

#[tokio::test]
async fn tenant_provisioning_creates_the_license_administrator() {
    let engine = MemoryEngine::new();
    let ctx = app_context(engine.clone()).await;
    bootstrap(&ctx).await.unwrap();
    let engine = engine.with_row(
        "public",
        "licenses",
        &license_row("AB12-CD34", Some("owner")),
    );

    let report = provision_tenant(&ctx, "AB12-CD34").await.unwrap();

    let tenant = "tenant_ab12_cd34";
    assert_eq!(report.created, vec!["roles", "branches", "users", "accounts"]);
    // three roles, the main branch, five accounts, and the administrator
    assert_eq!(report.seeded_rows, 10);
    assert_eq!(engine.column_values(tenant, "users", "username"), vec!["owner"]);
    assert_eq!(engine.column_values(tenant, "users", "email"), vec!["owner@acme.com"]);
    assert_eq!(engine.column_values(tenant, "users", "role_id"), vec!["1"]);
    assert_eq!(engine.column_values(tenant, "users", "branch_id"), vec!["1"]);
    assert_eq!(engine.column_values(tenant, "users", "is_admin"), vec!["true"]);
    assert!(engine.column_values(tenant, "users", "phone").is_empty());

    let again = provision_tenant(&ctx, "AB12-CD34").await.unwrap();
    assert!(again.is_noop());
    assert_eq!(engine.column_values(tenant, "users", "username").len(), 1);
}

#[tokio::test]
async fn license_without_administrator_provisions_no_user() {
    let engine = MemoryEngine::new();
    let ctx = app_context(engine.clone()).await;
    bootstrap(&ctx).await.unwrap();
    let engine = engine.with_row("public", "licenses", &license_row("ZZ99-0000", None));

    let report = provision_tenant(&ctx, "ZZ99-0000").await.unwrap();

    assert_eq!(report.seeded_rows, 9);
    assert!(engine
        .column_values("tenant_zz99_0000", "users", "username")
        .is_empty());
    assert!(!engine
        .journal()
        .iter()
        .any(|d| matches!(d, Directive::InsertRow { .. })));
}

