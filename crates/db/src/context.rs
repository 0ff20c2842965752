//! Execution context: settings, model registry, and engine, passed explicitly.

use licenses_kernel::{InitCtx, ModuleRegistry, Settings, TableScope};
use tracing::info;

use crate::bootstrap::{BootstrapPlan, Bootstrapper, Report};
use crate::engine::Engine;
use crate::error::{BootstrapError, Result};
use crate::postgres::PgEngine;

pub struct ExecutionContext<E: Engine> {
    settings: Settings,
    registry: ModuleRegistry,
    engine: E,
}

impl<E: Engine> ExecutionContext<E> {
    /// Bind settings and registry to an already open engine, running module
    /// initialization hooks.
    pub async fn new(settings: Settings, registry: ModuleRegistry, engine: E) -> Result<Self> {
        registry
            .init_modules(&InitCtx {
                settings: &settings,
            })
            .await
            .map_err(|err| BootstrapError::Declarations(format!("{err:#}")))?;

        Ok(Self {
            settings,
            registry,
            engine,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Tables of one scope in creation order.
    pub fn tables(&self, scope: TableScope) -> Result<Vec<licenses_kernel::TableDeclaration>> {
        self.registry
            .collect_tables(scope)
            .map_err(|err| BootstrapError::Declarations(format!("{err:#}")))
    }

    /// Plan for the shared tables in the configured namespace.
    pub fn shared_plan(&self) -> Result<BootstrapPlan> {
        let namespace = self.settings.database.namespace()?;
        Ok(
            BootstrapPlan::new(namespace, self.tables(TableScope::Shared)?)
                .with_seeds(self.registry.collect_seeds(TableScope::Shared))
                .create_namespace(self.settings.database.create_schema),
        )
    }

    /// Release the engine's connections.
    pub async fn close(self) {
        self.engine.close().await;
    }
}

impl ExecutionContext<PgEngine> {
    /// Connect to the configured PostgreSQL database.
    pub async fn connect(settings: Settings, registry: ModuleRegistry) -> Result<Self> {
        info!(
            env = ?settings.environment,
            schema = %settings.database.schema,
            "connecting to database"
        );
        let engine = PgEngine::connect(&settings.database).await?;
        Self::new(settings, registry, engine).await
    }
}

/// Ensure the shared tables exist in the configured namespace.
pub async fn bootstrap<E: Engine>(ctx: &ExecutionContext<E>) -> Result<Report> {
    let plan = ctx.shared_plan()?;
    Bootstrapper::new(ctx.engine()).run(&plan).await
}
