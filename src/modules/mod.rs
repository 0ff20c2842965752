pub mod licenses;
pub mod tenancy;

use licenses_kernel::ModuleRegistry;

/// Register all application modules with the registry
pub fn register_all(registry: &mut ModuleRegistry) {
    registry.register(licenses::create_module());
    registry.register(tenancy::create_module());
}
