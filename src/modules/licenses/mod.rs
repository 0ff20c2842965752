pub mod models;

use licenses_kernel::{Module, TableDeclaration};

/// Master license registry living in the shared namespace
pub struct LicensesModule;

impl LicensesModule {
    pub const fn new() -> Self {
        Self
    }
}

impl Module for LicensesModule {
    fn name(&self) -> &'static str {
        "licenses"
    }

    fn tables(&self) -> Vec<TableDeclaration> {
        vec![models::licenses(), models::license_events()]
    }
}

/// Create a new instance of the licenses module
pub fn create_module() -> std::sync::Arc<dyn Module> {
    std::sync::Arc::new(LicensesModule::new())
}
