//! Licenses application library
//!
//! Declares the application's modules and the tables they own. The bootstrap
//! reads these declarations through the module registry.

pub mod modules;

/// Re-export commonly used types
pub use modules::*;
