//! Schema bootstrap for the licenses database.
//!
//! [`bootstrap`] selects the configured namespace, creates every declared
//! shared table that is missing, and commits, all inside one transaction.
//! Running it again against a complete schema changes nothing.

pub mod bootstrap;
pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod tenant;

pub use bootstrap::{BootstrapPlan, BootstrapState, Bootstrapper, FollowUp, Report};
pub use context::{bootstrap, ExecutionContext};
pub use engine::{Engine, ExistingObject, Session};
pub use error::{BootstrapError, Result};
pub use memory::MemoryEngine;
pub use postgres::PgEngine;
pub use tenant::{drop_tenant, list_tenants, provision_tenant, TenantAdmin};
