use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use crate::module::{InitCtx, Module};
use crate::schema::{Seed, TableDeclaration, TableScope};

/// Module registry: the model registry the bootstrap reads table declarations from
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new module registry
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register a module with the registry
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    /// Get all registered modules in registration order
    pub fn modules(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.iter()
    }

    /// Get a module by name
    pub fn get_module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|module| module.name() == name)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Initialize modules in registration order
    pub async fn init_modules(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!("initializing {} modules", self.modules.len());

        for module in &self.modules {
            tracing::info!(module = module.name(), "initializing module");

            module
                .init(ctx)
                .await
                .with_context(|| format!("failed to initialize module '{}'", module.name()))?;
        }

        Ok(())
    }

    /// Collect the table declarations of one scope from all modules.
    ///
    /// Tables are ordered so that every table comes after the tables it
    /// references; otherwise registration order is kept.
    pub fn collect_tables(&self, scope: TableScope) -> anyhow::Result<Vec<TableDeclaration>> {
        let mut owners: HashMap<&'static str, &'static str> = HashMap::new();
        let mut tables = Vec::new();

        for module in &self.modules {
            for table in module.tables().into_iter().filter(|t| t.scope == scope) {
                if let Some(previous) = owners.insert(table.name, module.name()) {
                    bail!(
                        "table '{}' is declared by both '{}' and '{}'",
                        table.name,
                        previous,
                        module.name()
                    );
                }
                tables.push(table);
            }
        }

        order_by_dependencies(tables)
    }

    /// Collect the seeds of one scope from all modules, in registration order
    pub fn collect_seeds(&self, scope: TableScope) -> Vec<Seed> {
        self.modules
            .iter()
            .flat_map(|module| module.seeds())
            .filter(|seed| seed.scope == scope)
            .collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn order_by_dependencies(
    mut pending: Vec<TableDeclaration>,
) -> anyhow::Result<Vec<TableDeclaration>> {
    let declared: HashSet<&'static str> = pending.iter().map(|t| t.name).collect();
    let mut placed: HashSet<&'static str> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|table| {
            table
                .dependencies()
                .all(|dep| placed.contains(dep) || !declared.contains(dep))
        });

        let Some(index) = ready else {
            let names: Vec<_> = pending.iter().map(|t| t.name).collect();
            return Err(anyhow!(
                "foreign key cycle between tables: {}",
                names.join(", ")
            ));
        };

        let table = pending.remove(index);
        placed.insert(table.name);
        ordered.push(table);
    }

    Ok(ordered)
}
