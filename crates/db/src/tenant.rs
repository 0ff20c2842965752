//! Per-license tenant namespaces.
//!
//! Each license key owns a namespace named `<prefix><key>` holding the tenant
//! scope tables and their default rows. When the license row in the master
//! namespace names an administrator, that account is created too.

use async_trait::async_trait;
use licenses_kernel::{Namespace, RowValues, SeedValue, TableScope};
use tracing::{debug, info};

use crate::bootstrap::{BootstrapPlan, Bootstrapper, FollowUp, Report};
use crate::context::ExecutionContext;
use crate::engine::{Engine, Session};
use crate::error::{BootstrapError, Result};

const LICENSES_TABLE: &str = "licenses";
const USERS_TABLE: &str = "users";

/// License columns the administrator account is built from, in this order.
const LICENSE_COLUMNS: [&str; 6] = [
    "admin_username",
    "admin_password_hash",
    "client_email",
    "client_company",
    "client_name",
    "client_phone",
];

pub fn tenant_namespace<E: Engine>(
    ctx: &ExecutionContext<E>,
    license_key: &str,
) -> Result<Namespace> {
    Ok(ctx.settings().tenancy.namespace_for(license_key)?)
}

/// First administrator of a tenant, as recorded on its license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantAdmin {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

impl TenantAdmin {
    /// Build from the license values in [`LICENSE_COLUMNS`] order. `None` when
    /// the license has no administrator username or password hash.
    ///
    /// An email without `@` is replaced by `<username>@<company>.com`.
    pub fn from_license(values: Vec<Option<String>>) -> Option<Self> {
        let mut values = values.into_iter().map(|value| value.filter(|v| !v.is_empty()));
        let mut next = || values.next().flatten();

        let username = next()?;
        let password_hash = next()?;
        let email = next();
        let company = next();
        let full_name = next();
        let phone = next();

        let email = match email {
            Some(email) if email.contains('@') => email,
            _ => format!(
                "{username}@{}.com",
                company.as_deref().unwrap_or("company")
            ),
        };

        Some(Self {
            username,
            password_hash,
            email,
            full_name,
            phone,
        })
    }

    fn row(&self, role_id: Option<i64>, branch_id: Option<i64>) -> RowValues {
        vec![
            ("username", SeedValue::text(self.username.clone())),
            ("email", SeedValue::text(self.email.clone())),
            ("full_name", SeedValue::optional_text(self.full_name.clone())),
            ("phone", SeedValue::optional_text(self.phone.clone())),
            ("password_hash", SeedValue::text(self.password_hash.clone())),
            ("is_active", SeedValue::Bool(true)),
            ("is_admin", SeedValue::Bool(true)),
            ("role_id", role_id.map_or(SeedValue::Null, SeedValue::Int)),
            ("branch_id", branch_id.map_or(SeedValue::Null, SeedValue::Int)),
        ]
    }
}

/// Creates the license's administrator in the tenant namespace unless a user
/// with that username or email already exists.
struct AdminAccount {
    master: Namespace,
    license_key: String,
}

impl AdminAccount {
    async fn admin<S: Session>(&self, session: &mut S) -> Result<Option<TenantAdmin>> {
        if session.describe(&self.master, LICENSES_TABLE).await?.is_none() {
            debug!(master = %self.master, "no license table; skipping administrator");
            return Ok(None);
        }

        let values = session
            .find_row(
                &self.master,
                LICENSES_TABLE,
                "license_key",
                &self.license_key,
                &LICENSE_COLUMNS,
            )
            .await?;
        Ok(values.and_then(TenantAdmin::from_license))
    }
}

async fn lookup_id<S: Session>(
    session: &mut S,
    namespace: &Namespace,
    table: &str,
    column: &str,
    value: &str,
) -> Result<Option<i64>> {
    let found = session
        .find_row(namespace, table, column, value, &["id"])
        .await?;
    let Some(id) = found.and_then(|values| values.into_iter().next().flatten()) else {
        return Ok(None);
    };

    id.parse().map(Some).map_err(|_| {
        BootstrapError::Unexpected(format!("\"{table}\".\"id\" is not an integer: {id}"))
    })
}

#[async_trait]
impl<S: Session> FollowUp<S> for AdminAccount {
    async fn apply(&self, session: &mut S, namespace: &Namespace) -> Result<usize> {
        let Some(admin) = self.admin(session).await? else {
            return Ok(0);
        };

        let by_username = session
            .find_row(namespace, USERS_TABLE, "username", &admin.username, &["id"])
            .await?;
        let by_email = session
            .find_row(namespace, USERS_TABLE, "email", &admin.email, &["id"])
            .await?;
        if by_username.is_some() || by_email.is_some() {
            debug!(%namespace, username = %admin.username, "administrator already present");
            return Ok(0);
        }

        let role_id = lookup_id(session, namespace, "roles", "name", "admin").await?;
        let branch_id = lookup_id(session, namespace, "branches", "code", "MAIN").await?;
        session
            .insert_row(USERS_TABLE, &admin.row(role_id, branch_id))
            .await?;

        info!(%namespace, username = %admin.username, "tenant administrator created");
        Ok(1)
    }
}

/// Create the tenant namespace if needed, then its tables, default rows, and
/// the license's administrator account.
pub async fn provision_tenant<E: Engine>(
    ctx: &ExecutionContext<E>,
    license_key: &str,
) -> Result<Report> {
    let namespace = tenant_namespace(ctx, license_key)?;
    info!(license_key, %namespace, "provisioning tenant");

    let plan = BootstrapPlan::new(namespace, ctx.tables(TableScope::Tenant)?)
        .with_seeds(ctx.registry().collect_seeds(TableScope::Tenant))
        .create_namespace(true);
    let admin = AdminAccount {
        master: ctx.settings().database.namespace()?,
        license_key: license_key.to_string(),
    };

    Bootstrapper::new(ctx.engine())
        .run_with(&plan, &[&admin])
        .await
}

/// License keys of every provisioned tenant, sorted.
pub async fn list_tenants<E: Engine>(ctx: &ExecutionContext<E>) -> Result<Vec<String>> {
    let prefix = &ctx.settings().tenancy.schema_prefix;
    let mut session = ctx.engine().begin().await?;
    let namespaces = session.list_namespaces(prefix).await?;
    session.rollback().await?;

    let mut keys: Vec<String> = namespaces
        .iter()
        .filter_map(|namespace| namespace.tenant_license_key(prefix))
        .collect();
    keys.sort();
    Ok(keys)
}

/// Drop a tenant namespace with everything in it. Returns whether it existed.
pub async fn drop_tenant<E: Engine>(
    ctx: &ExecutionContext<E>,
    license_key: &str,
) -> Result<bool> {
    let namespace = tenant_namespace(ctx, license_key)?;
    let mut session = ctx.engine().begin().await?;

    session.lock_namespace(&namespace).await?;
    let existed = session.drop_namespace(&namespace).await?;
    session.commit().await?;

    info!(license_key, %namespace, existed, "tenant dropped");
    Ok(existed)
}
