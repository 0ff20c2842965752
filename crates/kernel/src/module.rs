use async_trait::async_trait;

use crate::schema::{Seed, TableDeclaration};

/// Context provided to modules during initialization
pub struct InitCtx<'a> {
    pub settings: &'a crate::settings::Settings,
}

/// An application module contributing table declarations to the bootstrap
#[async_trait]
pub trait Module: Sync + Send {
    /// Unique name for this module
    fn name(&self) -> &'static str;

    /// Validate settings or log module details before tables are collected
    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tables this module owns, in any scope
    fn tables(&self) -> Vec<TableDeclaration> {
        vec![]
    }

    /// Default rows inserted once the tables exist
    fn seeds(&self) -> Vec<Seed> {
        vec![]
    }
}
