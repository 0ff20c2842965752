pub mod models;

use anyhow::Context;
use async_trait::async_trait;
use licenses_kernel::{InitCtx, Module, Seed, TableDeclaration};


/// Per-license tables and their default rows, created inside each tenant namespace
pub struct TenancyModule;

impl TenancyModule {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Module for TenancyModule {
    fn name(&self) -> &'static str {
        "tenancy"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let prefix = &ctx.settings.tenancy.schema_prefix;

        // A probe key must yield a valid namespace, or no tenant ever will.
        ctx.settings
            .tenancy
            .namespace_for("PROBE")
            .with_context(|| format!("tenant schema prefix '{prefix}' is not usable"))?;

        tracing::info!(
            module = self.name(),
            schema_prefix = %prefix,
            "tenancy module initialized"
        );
        Ok(())
    }

    fn tables(&self) -> Vec<TableDeclaration> {
        vec![
            models::users(),
            models::roles(),
            models::branches(),
            models::accounts(),
        ]
    }

    fn seeds(&self) -> Vec<Seed> {
        vec![
            models::default_roles(),
            models::default_branch(),
            models::default_accounts(),
        ]
    }
}

/// Create a new instance of the tenancy module
pub fn create_module() -> std::sync::Arc<dyn Module> {
    std::sync::Arc::new(TenancyModule::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use licenses_kernel::{ModuleRegistry, Settings, TableScope};

    #[test]
    fn users_are_created_after_roles_and_branches() {
        let mut registry = ModuleRegistry::new();
        registry.register(create_module());

        let names: Vec<_> = registry
            .collect_tables(TableScope::Tenant)
            .unwrap()
            .iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["roles", "branches", "users", "accounts"]);
    }

    #[test]
    fn seed_rows_set_their_keys() {
        for seed in TenancyModule::new().seeds() {
            assert!(!seed.rows.is_empty());
            for row in &seed.rows {
                assert!(seed.key_of(row).is_some(), "{} row without key", seed.table);
            }
        }
        assert_eq!(models::default_accounts().rows.len(), 5);
    }

    #[tokio::test]
    async fn rejects_unusable_prefix() {
        let mut settings = Settings::default();
        settings.tenancy.schema_prefix = "Tenant-".to_string();

        let err = TenancyModule::new()
            .init(&InitCtx {
                settings: &settings,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not usable"));
    }

    #[tokio::test]
    async fn accepts_default_prefix() {
        let settings = Settings::default();
        TenancyModule::new()
            .init(&InitCtx {
                settings: &settings,
            })
            .await
            .unwrap();
    }
}
