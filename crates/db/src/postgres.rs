//! PostgreSQL engine backed by an sqlx connection pool.

use std::time::Duration;

use async_trait::async_trait;
use licenses_kernel::settings::DatabaseSettings;
use licenses_kernel::{insert_sql, ColumnShape, Namespace, Seed, SeedValue, TableDeclaration};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use crate::engine::{Engine, ExistingObject, Session};
use crate::error::{BootstrapError, Result};

/// Prefix of the advisory lock key, so bootstrap locks do not collide with
/// application locks on the same text.
const LOCK_KEY_PREFIX: &str = "licenses-bootstrap:";

const DESCRIBE_RELATION: &str = r#"
    SELECT c.relkind::text
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relname = $2
"#;

const DESCRIBE_COLUMNS: &str = r#"
    SELECT column_name::text, data_type::text, is_nullable = 'YES'
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

/// What an sqlx error was raised by.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Session,
    Namespace(&'a Namespace),
    Table(&'a Namespace, &'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    Connection,
    Namespace,
    Conflict,
    Unexpected,
}

fn classify_sqlstate(code: &str) -> ErrorClass {
    match code {
        // connection_exception, invalid_authorization_specification
        c if c.starts_with("08") || c.starts_with("28") => ErrorClass::Connection,
        // invalid_catalog_name, admin/crash shutdown, cannot_connect_now
        "3D000" | "57P01" | "57P02" | "57P03" => ErrorClass::Connection,
        // invalid_schema_name, duplicate_schema
        "3F000" | "42P06" => ErrorClass::Namespace,
        // duplicate_table, wrong_object_type, invalid_table_definition, duplicate_object
        "42P07" | "42809" | "42P16" | "42710" => ErrorClass::Conflict,
        _ => ErrorClass::Unexpected,
    }
}

fn classify(err: sqlx::Error, target: Target<'_>) -> BootstrapError {
    let class = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorClass::Connection,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| classify_sqlstate(&code))
            .unwrap_or(ErrorClass::Unexpected),
        _ => ErrorClass::Unexpected,
    };
    let message = err.to_string();

    match (class, target) {
        (ErrorClass::Connection, _) => BootstrapError::Connection(message),
        (ErrorClass::Conflict, Target::Table(namespace, table)) => {
            BootstrapError::conflict(namespace, table, message)
        }
        (ErrorClass::Namespace, Target::Namespace(namespace) | Target::Table(namespace, _)) => {
            BootstrapError::namespace(namespace, message)
        }
        // Permission and other failures while creating or dropping a namespace.
        (_, Target::Namespace(namespace)) if matches!(err, sqlx::Error::Database(_)) => {
            BootstrapError::namespace(namespace, message)
        }
        _ => BootstrapError::Unexpected(message),
    }
}

/// Connection pool for the configured database.
#[derive(Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    /// Open the pool and establish a first connection.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .connect(&settings.url)
            .await
            .map_err(|err| classify(err, Target::Session))?;

        info!("database connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Engine for PgEngine {
    type Session = PgSession;

    async fn begin(&self) -> Result<PgSession> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| classify(err, Target::Session))?;
        Ok(PgSession { tx, selected: None })
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("database pool closed");
    }
}

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
    /// Last namespace put on the search path, for error reporting.
    selected: Option<Namespace>,
}

#[async_trait]
impl Session for PgSession {
    async fn lock_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || $2))")
            .bind(LOCK_KEY_PREFIX)
            .bind(namespace.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Namespace(namespace)))?;
        Ok(())
    }

    async fn namespace_exists(&mut self, namespace: &Namespace) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        )
        .bind(namespace.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| classify(err, Target::Namespace(namespace)))
    }

    async fn create_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", namespace.quoted());
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Namespace(namespace)))?;
        Ok(())
    }

    async fn select_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        let sql = format!("SET LOCAL search_path TO {}", namespace.quoted());
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Namespace(namespace)))?;
        self.selected = Some(namespace.clone());
        Ok(())
    }

    async fn describe(
        &mut self,
        namespace: &Namespace,
        table: &str,
    ) -> Result<Option<ExistingObject>> {
        let kind: Option<String> = sqlx::query_scalar(DESCRIBE_RELATION)
            .bind(namespace.as_str())
            .bind(table)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Table(namespace, table)))?;

        let Some(kind) = kind else {
            return Ok(None);
        };
        if kind != "r" && kind != "p" {
            return Ok(Some(ExistingObject::Other {
                kind: relkind_name(&kind).to_string(),
            }));
        }

        let rows: Vec<(String, String, bool)> = sqlx::query_as(DESCRIBE_COLUMNS)
            .bind(namespace.as_str())
            .bind(table)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Table(namespace, table)))?;

        Ok(Some(ExistingObject::Table(
            rows.into_iter()
                .map(|(name, data_type, nullable)| ColumnShape::new(name, data_type, nullable))
                .collect(),
        )))
    }

    async fn create_table(&mut self, table: &TableDeclaration) -> Result<()> {
        let sql = table.create_sql();
        let namespace = self.selected.clone().unwrap_or_else(Namespace::public);

        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Table(&namespace, table.name)))?;
        Ok(())
    }

    async fn insert_seed_row(
        &mut self,
        seed: &Seed,
        row: &[(&'static str, SeedValue)],
    ) -> Result<bool> {
        let sql = seed.insert_sql(row);
        let result = bind_values(sqlx::query(&sql), row)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Session))?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_row(
        &mut self,
        namespace: &Namespace,
        table: &str,
        key_column: &str,
        key: &str,
        columns: &[&str],
    ) -> Result<Option<Vec<Option<String>>>> {
        let selected = columns
            .iter()
            .map(|column| format!("\"{column}\"::text"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {selected} FROM {}.\"{table}\" WHERE \"{key_column}\"::text = $1 LIMIT 1",
            namespace.quoted()
        );

        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Table(namespace, table)))?;

        row.map(|row| {
            (0..columns.len())
                .map(|index| row.try_get::<Option<String>, _>(index))
                .collect::<std::result::Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|err| classify(err, Target::Table(namespace, table)))
    }

    async fn insert_row(&mut self, table: &str, row: &[(&'static str, SeedValue)]) -> Result<()> {
        let sql = insert_sql(table, row, None);
        let namespace = self.selected.clone().unwrap_or_else(Namespace::public);

        bind_values(sqlx::query(&sql), row)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Table(&namespace, table)))?;
        Ok(())
    }

    async fn list_namespaces(&mut self, prefix: &str) -> Result<Vec<Namespace>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT nspname::text FROM pg_catalog.pg_namespace \
             WHERE left(nspname, length($1)) = $1 ORDER BY nspname",
        )
        .bind(prefix)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| classify(err, Target::Session))?;

        Ok(names
            .into_iter()
            .filter_map(|name| match Namespace::parse(name.as_str()) {
                Ok(namespace) => Some(namespace),
                Err(err) => {
                    debug!(%name, error = %err, "skipping namespace with unsupported name");
                    None
                }
            })
            .collect())
    }

    async fn drop_namespace(&mut self, namespace: &Namespace) -> Result<bool> {
        let existed = self.namespace_exists(namespace).await?;
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", namespace.quoted());
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| classify(err, Target::Namespace(namespace)))?;
        Ok(existed)
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| classify(err, Target::Session))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|err| classify(err, Target::Session))
    }
}

/// Bind the non-null values of a row in order, matching [`insert_sql`].
fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    row: &'q [(&'static str, SeedValue)],
) -> Query<'q, Postgres, PgArguments> {
    for (_, value) in row {
        query = match value {
            SeedValue::Text(text) => query.bind(&**text),
            SeedValue::Int(int) => query.bind(*int),
            SeedValue::Bool(flag) => query.bind(*flag),
            SeedValue::Null => query,
        };
    }
    query
}

fn relkind_name(kind: &str) -> &'static str {
    match kind {
        "v" => "view",
        "m" => "materialized view",
        "i" | "I" => "index",
        "S" => "sequence",
        "f" => "foreign table",
        "c" => "composite type",
        _ => "relation",
    }
}
