//! In-process engine with PostgreSQL-like transaction semantics.
//!
//! Sessions read committed state overlaid with their own pending changes, and
//! apply those changes only on commit. Every directive is journaled so callers
//! can probe ordering after the fact.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use licenses_kernel::{ColumnShape, Namespace, Seed, SeedValue, TableDeclaration};
use tokio::sync::OwnedMutexGuard;

use crate::engine::{Engine, ExistingObject, Session};
use crate::error::{BootstrapError, Result};

/// A directive a session issued, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Begin,
    /// Recorded once the lock is held.
    Lock(String),
    CreateNamespace(String),
    SelectNamespace(String),
    CreateTable { namespace: String, table: String },
    InsertSeed { namespace: String, table: String, key: String },
    InsertRow { namespace: String, table: String },
    DropNamespace(String),
    Commit,
    Rollback,
}

/// Column values of a stored row; NULL columns are absent.
type Row = BTreeMap<String, String>;

#[derive(Debug, Clone)]
enum Relation {
    Table { columns: Vec<ColumnShape>, rows: Vec<Row> },
    Other(String),
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    namespaces: BTreeMap<String, BTreeMap<String, Relation>>,
}

#[derive(Debug, Clone)]
enum Change {
    CreateNamespace(String),
    CreateTable {
        namespace: String,
        table: String,
        columns: Vec<ColumnShape>,
    },
    InsertRow {
        namespace: String,
        table: String,
        row: Row,
    },
    DropNamespace(String),
}

impl Catalog {
    fn apply(&mut self, change: &Change) {
        match change {
            Change::CreateNamespace(name) => {
                self.namespaces.entry(name.clone()).or_default();
            }
            Change::CreateTable {
                namespace,
                table,
                columns,
            } => {
                if let Some(relations) = self.namespaces.get_mut(namespace) {
                    relations.entry(table.clone()).or_insert_with(|| Relation::Table {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    });
                }
            }
            Change::InsertRow {
                namespace,
                table,
                row,
            } => {
                if let Some(Relation::Table { columns, rows }) = self
                    .namespaces
                    .get_mut(namespace)
                    .and_then(|relations| relations.get_mut(table))
                {
                    let mut row = row.clone();
                    // Serial ids count up from the highest stored one.
                    if columns.iter().any(|c| c.name == "id") && !row.contains_key("id") {
                        let next = rows
                            .iter()
                            .filter_map(|stored| stored.get("id")?.parse::<i64>().ok())
                            .max()
                            .unwrap_or(0)
                            + 1;
                        row.insert("id".to_string(), next.to_string());
                    }
                    rows.push(row);
                }
            }
            Change::DropNamespace(name) => {
                self.namespaces.remove(name);
            }
        }
    }

    /// Why committing `change` on top of this catalog would fail, the way a
    /// concurrent transaction's duplicate DDL fails at the server.
    fn collision(&self, change: &Change) -> Option<String> {
        match change {
            Change::CreateNamespace(name) if self.namespaces.contains_key(name) => {
                Some(format!("schema \"{name}\" already exists"))
            }
            Change::CreateTable {
                namespace, table, ..
            } if self.relation(namespace, table).is_some() => Some(format!(
                "duplicate key value violates unique constraint: relation \"{namespace}.{table}\""
            )),
            _ => None,
        }
    }

    fn relation(&self, namespace: &str, table: &str) -> Option<&Relation> {
        self.namespaces.get(namespace)?.get(table)
    }

    fn rows(&self, namespace: &str, table: &str) -> Result<&[Row]> {
        match self.relation(namespace, table) {
            Some(Relation::Table { rows, .. }) => Ok(rows),
            _ => Err(BootstrapError::Unexpected(format!(
                "relation \"{namespace}.{table}\" does not exist"
            ))),
        }
    }
}

fn stored_row(row: &[(&'static str, SeedValue)]) -> Row {
    row.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(column, value)| (column.to_string(), value.to_string()))
        .collect()
}

struct Shared {
    catalog: Mutex<Catalog>,
    journal: Mutex<Vec<Directive>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    unreachable: AtomicBool,
    latency: Option<Duration>,
    default_namespace: String,
}

/// Cloning shares the same catalog.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryEngine {
    /// Empty database with only the `public` namespace, which is also the
    /// connection default.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Like [`MemoryEngine::new`], but every catalog read or write first
    /// sleeps for `latency`, so concurrent sessions interleave.
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(Some(latency))
    }

    fn build(latency: Option<Duration>) -> Self {
        let mut catalog = Catalog::default();
        catalog.namespaces.insert(Namespace::public().to_string(), BTreeMap::new());

        Self {
            shared: Arc::new(Shared {
                catalog: Mutex::new(catalog),
                journal: Mutex::new(Vec::new()),
                locks: Mutex::new(HashMap::new()),
                unreachable: AtomicBool::new(false),
                latency,
                default_namespace: Namespace::public().to_string(),
            }),
        }
    }

    /// A database every `begin` fails to reach.
    pub fn unreachable() -> Self {
        let engine = Self::new();
        engine.set_unreachable(true);
        engine
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        lock(&self.shared.catalog).apply(&Change::CreateNamespace(namespace.to_string()));
        self
    }

    /// Pre-create a table with exactly the declared shape.
    pub fn with_table(self, namespace: &str, table: &TableDeclaration) -> Self {
        self.with_columns(namespace, table.name, table.expected_shape())
    }

    pub fn with_columns(self, namespace: &str, table: &str, columns: Vec<ColumnShape>) -> Self {
        {
            let mut catalog = lock(&self.shared.catalog);
            catalog.apply(&Change::CreateNamespace(namespace.to_string()));
            catalog.apply(&Change::CreateTable {
                namespace: namespace.to_string(),
                table: table.to_string(),
                columns,
            });
        }
        self
    }

    /// Pre-insert a row into an existing table.
    pub fn with_row(
        self,
        namespace: &str,
        table: &str,
        row: &[(&'static str, SeedValue)],
    ) -> Self {
        lock(&self.shared.catalog).apply(&Change::InsertRow {
            namespace: namespace.to_string(),
            table: table.to_string(),
            row: stored_row(row),
        });
        self
    }

    /// Pre-create a non-table relation, e.g. a view.
    pub fn with_relation(self, namespace: &str, name: &str, kind: &str) -> Self {
        lock(&self.shared.catalog)
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), Relation::Other(kind.to_string()));
        self
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        lock(&self.shared.catalog).namespaces.contains_key(namespace)
    }

    /// Committed table names of a namespace, sorted.
    pub fn tables(&self, namespace: &str) -> Vec<String> {
        lock(&self.shared.catalog)
            .namespaces
            .get(namespace)
            .map(|relations| {
                relations
                    .iter()
                    .filter(|(_, relation)| matches!(relation, Relation::Table { .. }))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Committed non-null values of one column, in insertion order.
    pub fn column_values(&self, namespace: &str, table: &str, column: &str) -> Vec<String> {
        lock(&self.shared.catalog)
            .rows(namespace, table)
            .map(|rows| rows.iter().filter_map(|row| row.get(column).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<Directive> {
        lock(&self.shared.journal).clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.shared.journal).clear();
    }

    fn record(&self, directive: Directive) {
        lock(&self.shared.journal).push(directive);
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.shared.locks)
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    async fn pause(&self) {
        if let Some(latency) = self.shared.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession> {
        if self.shared.unreachable.load(Ordering::SeqCst) {
            return Err(BootstrapError::Connection(
                "error connecting to memory database: connection refused".to_string(),
            ));
        }
        self.record(Directive::Begin);

        Ok(MemorySession {
            engine: self.clone(),
            search_path: None,
            pending: Vec::new(),
            guards: Vec::new(),
        })
    }
}

pub struct MemorySession {
    engine: MemoryEngine,
    search_path: Option<String>,
    pending: Vec<Change>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl MemorySession {
    /// Committed state with this session's pending changes applied.
    fn view(&self) -> Catalog {
        let mut catalog = lock(&self.engine.shared.catalog).clone();
        for change in &self.pending {
            catalog.apply(change);
        }
        catalog
    }

    fn target_namespace(&self) -> String {
        self.search_path
            .clone()
            .unwrap_or_else(|| self.engine.shared.default_namespace.clone())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn lock_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        let guard = self
            .engine
            .namespace_lock(namespace.as_str())
            .lock_owned()
            .await;
        self.guards.push(guard);
        self.engine.record(Directive::Lock(namespace.to_string()));
        Ok(())
    }

    async fn namespace_exists(&mut self, namespace: &Namespace) -> Result<bool> {
        self.engine.pause().await;
        Ok(self.view().namespaces.contains_key(namespace.as_str()))
    }

    async fn create_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        self.engine.pause().await;
        self.engine
            .record(Directive::CreateNamespace(namespace.to_string()));
        self.pending
            .push(Change::CreateNamespace(namespace.to_string()));
        Ok(())
    }

    async fn select_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        self.engine
            .record(Directive::SelectNamespace(namespace.to_string()));
        self.search_path = Some(namespace.to_string());
        Ok(())
    }

    async fn describe(
        &mut self,
        namespace: &Namespace,
        table: &str,
    ) -> Result<Option<ExistingObject>> {
        self.engine.pause().await;
        let view = self.view();
        Ok(match view.relation(namespace.as_str(), table) {
            None => None,
            Some(Relation::Table { columns, .. }) => Some(ExistingObject::Table(columns.clone())),
            Some(Relation::Other(kind)) => Some(ExistingObject::Other { kind: kind.clone() }),
        })
    }

    async fn create_table(&mut self, table: &TableDeclaration) -> Result<()> {
        self.engine.pause().await;
        let namespace = self.target_namespace();
        self.engine.record(Directive::CreateTable {
            namespace: namespace.clone(),
            table: table.name.to_string(),
        });

        let view = self.view();
        let Some(relations) = view.namespaces.get(&namespace) else {
            return Err(BootstrapError::Namespace {
                namespace: namespace.clone(),
                message: format!("schema \"{namespace}\" does not exist"),
            });
        };
        match relations.get(table.name) {
            // IF NOT EXISTS: a table of that name is left alone.
            Some(Relation::Table { .. }) => Ok(()),
            Some(Relation::Other(kind)) => Err(BootstrapError::SchemaConflict {
                namespace,
                table: table.name.to_string(),
                detail: format!("\"{}\" is not a table but a {kind}", table.name),
            }),
            None => {
                self.pending.push(Change::CreateTable {
                    namespace,
                    table: table.name.to_string(),
                    columns: table.expected_shape(),
                });
                Ok(())
            }
        }
    }

    async fn insert_seed_row(
        &mut self,
        seed: &Seed,
        row: &[(&'static str, SeedValue)],
    ) -> Result<bool> {
        self.engine.pause().await;
        let namespace = self.target_namespace();
        let Some(value) = seed.key_of(row) else {
            return Err(BootstrapError::Unexpected(format!(
                "seed row for \"{}\" does not set key column \"{}\"",
                seed.table, seed.key
            )));
        };
        let value = value.to_string();

        let view = self.view();
        let present = view
            .rows(&namespace, seed.table)?
            .iter()
            .any(|stored| stored.get(seed.key) == Some(&value));
        if present {
            return Ok(false);
        }

        self.engine.record(Directive::InsertSeed {
            namespace: namespace.clone(),
            table: seed.table.to_string(),
            key: format!("{}={}", seed.key, value),
        });
        self.pending.push(Change::InsertRow {
            namespace,
            table: seed.table.to_string(),
            row: stored_row(row),
        });
        Ok(true)
    }

    async fn find_row(
        &mut self,
        namespace: &Namespace,
        table: &str,
        key_column: &str,
        key: &str,
        columns: &[&str],
    ) -> Result<Option<Vec<Option<String>>>> {
        self.engine.pause().await;
        let view = self.view();
        let found = view
            .rows(namespace.as_str(), table)?
            .iter()
            .find(|stored| stored.get(key_column).map(String::as_str) == Some(key))
            .map(|stored| {
                columns
                    .iter()
                    .map(|column| stored.get(*column).cloned())
                    .collect()
            });
        Ok(found)
    }

    async fn insert_row(&mut self, table: &str, row: &[(&'static str, SeedValue)]) -> Result<()> {
        self.engine.pause().await;
        let namespace = self.target_namespace();
        self.view().rows(&namespace, table)?;

        self.engine.record(Directive::InsertRow {
            namespace: namespace.clone(),
            table: table.to_string(),
        });
        self.pending.push(Change::InsertRow {
            namespace,
            table: table.to_string(),
            row: stored_row(row),
        });
        Ok(())
    }

    async fn list_namespaces(&mut self, prefix: &str) -> Result<Vec<Namespace>> {
        Ok(self
            .view()
            .namespaces
            .keys()
            .filter(|name| name.starts_with(prefix))
            .filter_map(|name| Namespace::parse(name.as_str()).ok())
            .collect())
    }

    async fn drop_namespace(&mut self, namespace: &Namespace) -> Result<bool> {
        let existed = self.view().namespaces.contains_key(namespace.as_str());
        self.engine
            .record(Directive::DropNamespace(namespace.to_string()));
        self.pending.push(Change::DropNamespace(namespace.to_string()));
        Ok(existed)
    }

    async fn commit(self) -> Result<()> {
        let mut catalog = lock(&self.engine.shared.catalog);
        if let Some(reason) = self.pending.iter().find_map(|change| catalog.collision(change)) {
            drop(catalog);
            self.engine.record(Directive::Rollback);
            return Err(BootstrapError::Unexpected(reason));
        }

        for change in &self.pending {
            catalog.apply(change);
        }
        drop(catalog);
        self.engine.record(Directive::Commit);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.engine.record(Directive::Rollback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use licenses_kernel::{ColumnDeclaration, ColumnType, TableScope};

    fn roles() -> TableDeclaration {
        TableDeclaration::new("roles", TableScope::Tenant)
            .column(ColumnDeclaration::serial_id("id"))
            .column(ColumnDeclaration::new("name", ColumnType::Text).not_null().unique())
    }

    #[tokio::test]
    async fn uncommitted_changes_are_invisible_to_other_sessions() {
        let engine = MemoryEngine::new();
        let mut writer = engine.begin().await.unwrap();
        writer.create_table(&roles()).await.unwrap();

        let mut reader = engine.begin().await.unwrap();
        assert!(reader
            .describe(&Namespace::public(), "roles")
            .await
            .unwrap()
            .is_none());
        assert!(writer
            .describe(&Namespace::public(), "roles")
            .await
            .unwrap()
            .is_some());

        writer.commit().await.unwrap();
        assert!(reader
            .describe(&Namespace::public(), "roles")
            .await
            .unwrap()
            .is_some());
        assert_eq!(engine.tables("public"), vec!["roles".to_string()]);
    }

    #[tokio::test]
    async fn dropped_session_discards_work() {
        let engine = MemoryEngine::new();
        {
            let mut session = engine.begin().await.unwrap();
            session.create_table(&roles()).await.unwrap();
        }
        assert!(engine.tables("public").is_empty());
    }

    #[tokio::test]
    async fn create_without_selection_uses_connection_default() {
        let engine = MemoryEngine::new().with_namespace("licensing");
        let mut session = engine.begin().await.unwrap();
        session.create_table(&roles()).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(engine.tables("public"), vec!["roles".to_string()]);
        assert!(engine.tables("licensing").is_empty());
    }

    #[tokio::test]
    async fn seed_keys_are_inserted_once() {
        let engine = MemoryEngine::new().with_table("public", &roles());
        let seed = Seed::new("roles", TableScope::Tenant, "name")
            .row(vec![("name", SeedValue::text("admin"))]);

        let mut session = engine.begin().await.unwrap();
        assert!(session.insert_seed_row(&seed, &seed.rows[0]).await.unwrap());
        assert!(!session.insert_seed_row(&seed, &seed.rows[0]).await.unwrap());
        session.commit().await.unwrap();

        assert_eq!(engine.column_values("public", "roles", "name"), vec!["admin"]);
        assert_eq!(engine.column_values("public", "roles", "id"), vec!["1"]);
    }

    #[tokio::test]
    async fn racing_table_creation_fails_the_later_commit() {
        let engine = MemoryEngine::new();
        let mut first = engine.begin().await.unwrap();
        let mut second = engine.begin().await.unwrap();
        first.create_table(&roles()).await.unwrap();
        second.create_table(&roles()).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();

        assert!(err.to_string().contains("public.roles"), "got {err}");
        assert_eq!(engine.journal().last(), Some(&Directive::Rollback));
        assert_eq!(engine.tables("public"), vec!["roles".to_string()]);
    }

    #[tokio::test]
    async fn rows_are_found_by_key_column() {
        let engine = MemoryEngine::new()
            .with_table("public", &roles())
            .with_row("public", "roles", &[("name", SeedValue::text("admin"))])
            .with_row("public", "roles", &[("name", SeedValue::text("user"))]);

        let mut session = engine.begin().await.unwrap();
        let public = Namespace::public();
        let user = session
            .find_row(&public, "roles", "name", "user", &["id", "description"])
            .await
            .unwrap();
        assert_eq!(user, Some(vec![Some("2".to_string()), None]));
        assert!(session
            .find_row(&public, "roles", "name", "guest", &["id"])
            .await
            .unwrap()
            .is_none());
        assert!(session
            .find_row(&public, "missing", "name", "user", &["id"])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn inserted_rows_skip_null_columns() {
        let engine = MemoryEngine::new().with_table("public", &roles());
        let mut session = engine.begin().await.unwrap();
        session
            .insert_row(
                "roles",
                &[
                    ("name", SeedValue::text("auditor")),
                    ("description", SeedValue::Null),
                ],
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert_eq!(engine.column_values("public", "roles", "name"), vec!["auditor"]);
        assert!(engine.column_values("public", "roles", "description").is_empty());
    }

    #[tokio::test]
    async fn unreachable_engine_refuses_sessions() {
        let engine = MemoryEngine::unreachable();
        let err = engine.begin().await.err().unwrap();
        assert!(err.is_connection());
        assert!(engine.journal().is_empty());
    }
}
