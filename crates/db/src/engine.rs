//! Seams between the bootstrap sequence and a concrete database.

use async_trait::async_trait;
use licenses_kernel::{ColumnShape, Namespace, Seed, SeedValue, TableDeclaration};

use crate::error::Result;

/// What the catalog holds under a name inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingObject {
    Table(Vec<ColumnShape>),
    /// A view, sequence, index or other non-table relation.
    Other { kind: String },
}

/// A connection pool able to hand out transactional sessions.
#[async_trait]
pub trait Engine: Send + Sync {
    type Session: Session;

    /// Begin a transaction on a pooled connection.
    async fn begin(&self) -> Result<Self::Session>;

    /// Release pooled connections.
    async fn close(&self) {}
}

/// A transaction owned by one caller.
///
/// Dropping a session without calling [`Session::commit`] discards its work.
#[async_trait]
pub trait Session: Send {
    /// Transaction-scoped lock serializing bootstraps of the same namespace.
    async fn lock_namespace(&mut self, namespace: &Namespace) -> Result<()>;

    async fn namespace_exists(&mut self, namespace: &Namespace) -> Result<bool>;

    async fn create_namespace(&mut self, namespace: &Namespace) -> Result<()>;

    /// Make `namespace` the target of unqualified DDL on this session.
    async fn select_namespace(&mut self, namespace: &Namespace) -> Result<()>;

    async fn describe(
        &mut self,
        namespace: &Namespace,
        table: &str,
    ) -> Result<Option<ExistingObject>>;

    /// Issue `CREATE TABLE IF NOT EXISTS` against the selected namespace.
    async fn create_table(&mut self, table: &TableDeclaration) -> Result<()>;

    /// Insert a seed row unless its key is already present. Returns whether a
    /// row was written.
    async fn insert_seed_row(
        &mut self,
        seed: &Seed,
        row: &[(&'static str, SeedValue)],
    ) -> Result<bool>;

    /// Text renderings of `columns` from the first row of `namespace.table`
    /// whose `key_column` equals `key`. `None` entries are NULLs.
    async fn find_row(
        &mut self,
        namespace: &Namespace,
        table: &str,
        key_column: &str,
        key: &str,
        columns: &[&str],
    ) -> Result<Option<Vec<Option<String>>>>;

    /// Plain `INSERT` into a table of the selected namespace. NULL values are
    /// left to the column default.
    async fn insert_row(&mut self, table: &str, row: &[(&'static str, SeedValue)]) -> Result<()>;

    async fn list_namespaces(&mut self, prefix: &str) -> Result<Vec<Namespace>>;

    /// Drop a namespace and everything in it. Returns whether it existed.
    async fn drop_namespace(&mut self, namespace: &Namespace) -> Result<bool>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
