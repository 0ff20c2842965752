//! Kernel of the licenses bootstrap: layered settings, schema namespaces,
//! table declarations, and the module registry that collects them.

pub mod module;
pub mod namespace;
pub mod registry;
pub mod schema;
pub mod settings;

pub use module::{InitCtx, Module};
pub use namespace::{Namespace, NamespaceError};
pub use registry::ModuleRegistry;
pub use schema::{
    insert_sql, ColumnDeclaration, ColumnShape, ColumnType, RowValues, Seed, SeedValue,
    ShapeConflict, TableDeclaration, TableScope,
};
pub use settings::Settings;
