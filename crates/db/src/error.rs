//! Error taxonomy of the schema bootstrap.
//!
//! Engine error text is carried verbatim inside each variant.

use licenses_kernel::{Namespace, NamespaceError, ShapeConflict};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BootstrapError>;

#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Database unreachable, credentials rejected, or pool exhausted.
    #[error("connection error: {0}")]
    Connection(String),

    /// The namespace is invalid, missing, or could not be created.
    #[error("namespace error for '{namespace}': {message}")]
    Namespace { namespace: String, message: String },

    /// A declared table collides with an incompatible existing object.
    #[error("schema conflict on '{namespace}.{table}': {detail}")]
    SchemaConflict {
        namespace: String,
        table: String,
        detail: String,
    },

    #[error("unexpected database error: {0}")]
    Unexpected(String),

    /// The registry's declarations are inconsistent (duplicates, FK cycles).
    #[error("invalid table declarations: {0}")]
    Declarations(String),
}

impl BootstrapError {
    pub fn namespace(namespace: &Namespace, message: impl Into<String>) -> Self {
        Self::Namespace {
            namespace: namespace.to_string(),
            message: message.into(),
        }
    }

    pub fn conflict(namespace: &Namespace, table: &str, detail: impl Into<String>) -> Self {
        Self::SchemaConflict {
            namespace: namespace.to_string(),
            table: table.to_string(),
            detail: detail.into(),
        }
    }

    /// Conflict built from the column differences the declaration reported.
    pub fn shape_conflict(namespace: &Namespace, table: &str, conflicts: &[ShapeConflict]) -> Self {
        let detail = conflicts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::conflict(namespace, table, detail)
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_schema_conflict(&self) -> bool {
        matches!(self, Self::SchemaConflict { .. })
    }
}

impl From<NamespaceError> for BootstrapError {
    fn from(err: NamespaceError) -> Self {
        let namespace = match &err {
            NamespaceError::Empty => String::new(),
            NamespaceError::TooLong { name }
            | NamespaceError::InvalidCharacter { name, .. }
            | NamespaceError::LeadingDigit { name } => name.clone(),
        };
        Self::Namespace {
            namespace,
            message: err.to_string(),
        }
    }
}
