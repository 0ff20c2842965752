mod deps;

use anyhow::Context;
use clap::{Parser, Subcommand};
use licenses_db::{
    bootstrap, drop_tenant, list_tenants, provision_tenant, BootstrapError, ExecutionContext,
    PgEngine,
};
use licenses_kernel::{ModuleRegistry, Settings};

/// Prepare dependencies and bootstrap the licenses database schema.
///
/// Without a subcommand both stages run in order.
#[derive(Debug, Parser)]
#[command(name = "licenses-bootstrap", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run only the dependency preparation stage
    Deps,
    /// Run only the schema bootstrap of the configured namespace
    Schema,
    /// Manage per-license tenant namespaces
    Tenant {
        #[command(subcommand)]
        action: TenantCommand,
    },
}

#[derive(Debug, Subcommand)]
enum TenantCommand {
    /// Create a tenant namespace with its tables and default rows
    Create { license_key: String },
    /// List license keys that have a tenant namespace
    List,
    /// Drop a tenant namespace and everything in it
    Drop { license_key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load().with_context(|| "failed to load bootstrap settings")?;
    licenses_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        schema = %settings.database.schema,
        "licenses bootstrap starting"
    );

    match cli.command {
        None => {
            deps::prepare(&settings.dependencies)
                .await
                .with_context(|| "dependency preparation failed")?;
            run_database(settings, None).await
        }
        Some(Command::Deps) => deps::prepare(&settings.dependencies)
            .await
            .with_context(|| "dependency preparation failed"),
        Some(Command::Schema) => run_database(settings, None).await,
        Some(Command::Tenant { action }) => run_database(settings, Some(action)).await,
    }
}

fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    licenses_app::modules::register_all(&mut registry);
    registry
}

/// Connect, run the schema bootstrap or a tenant command, and release the pool
/// on every path.
async fn run_database(settings: Settings, tenant: Option<TenantCommand>) -> anyhow::Result<()> {
    let ctx = ExecutionContext::connect(settings, registry()).await?;
    let outcome = execute(&ctx, tenant).await;
    ctx.close().await;

    println!("{}", outcome?);
    Ok(())
}

async fn execute(
    ctx: &ExecutionContext<PgEngine>,
    tenant: Option<TenantCommand>,
) -> Result<String, BootstrapError> {
    match tenant {
        None => Ok(bootstrap(ctx).await?.to_string()),
        Some(TenantCommand::Create { license_key }) => {
            Ok(provision_tenant(ctx, &license_key).await?.to_string())
        }
        Some(TenantCommand::List) => Ok(tenant_listing(&list_tenants(ctx).await?)),
        Some(TenantCommand::Drop { license_key }) => {
            let existed = drop_tenant(ctx, &license_key).await?;
            Ok(if existed {
                format!("tenant {license_key} dropped")
            } else {
                format!("tenant {license_key} did not exist")
            })
        }
    }
}

fn tenant_listing(keys: &[String]) -> String {
    if keys.is_empty() {
        "no tenants provisioned".to_string()
    } else {
        keys.join("\n")
    }
}
