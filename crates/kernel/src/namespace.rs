use std::fmt;

use thiserror::Error;

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Schema namespace used when nothing else is configured.
pub const PUBLIC: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("namespace name is empty")]
    Empty,

    #[error("namespace '{name}' exceeds 63 bytes")]
    TooLong { name: String },

    #[error("namespace '{name}' contains invalid character '{found}'")]
    InvalidCharacter { name: String, found: char },

    #[error("namespace '{name}' must not start with a digit")]
    LeadingDigit { name: String },
}

/// A validated schema namespace identifier.
///
/// Only lowercase ASCII letters, digits and `_` are accepted, so the name can be
/// spliced into DDL without further escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    pub fn parse(raw: impl Into<String>) -> Result<Self, NamespaceError> {
        let name = raw.into();

        if name.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(NamespaceError::TooLong { name });
        }
        if let Some(found) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(NamespaceError::InvalidCharacter { name, found });
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(NamespaceError::LeadingDigit { name });
        }

        Ok(Self(name))
    }

    pub fn public() -> Self {
        Self(PUBLIC.to_string())
    }

    /// Namespace holding a single license's tenant tables.
    ///
    /// `ABCD-1234` with prefix `tenant_` becomes `tenant_abcd_1234`.
    pub fn for_tenant(prefix: &str, license_key: &str) -> Result<Self, NamespaceError> {
        let normalized = license_key.trim().replace('-', "_").to_lowercase();
        Self::parse(format!("{prefix}{normalized}"))
    }

    /// Recovers the license key from a tenant namespace, if it carries `prefix`.
    pub fn tenant_license_key(&self, prefix: &str) -> Option<String> {
        let rest = self.0.strip_prefix(prefix)?;
        if rest.is_empty() {
            return None;
        }
        Some(rest.replace('_', "-").to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for use in SQL statements.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Namespace {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
