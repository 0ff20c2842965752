//! Table declarations contributed by modules.
//!
//! A declaration renders its own `CREATE TABLE IF NOT EXISTS` statement and can
//! compare itself against the columns an existing table reports from the catalog.

use std::borrow::Cow;
use std::fmt;

/// Which namespace a table belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableScope {
    /// Lives in the configured master namespace (`public` by default).
    Shared,
    /// Created inside every tenant namespace.
    Tenant,
}

/// Column types the declarations use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Serial,
    BigSerial,
    Integer,
    BigInt,
    Text,
    Varchar(u16),
    Boolean,
    Timestamp,
    Date,
    Numeric(u8, u8),
}

impl ColumnType {
    /// Type as written in DDL.
    pub fn ddl(&self) -> String {
        match self {
            Self::Serial => "SERIAL".to_string(),
            Self::BigSerial => "BIGSERIAL".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(len) => format!("VARCHAR({len})"),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Numeric(precision, scale) => format!("NUMERIC({precision}, {scale})"),
        }
    }

    /// Type as reported by `information_schema.columns.data_type`.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            Self::Serial | Self::Integer => "integer",
            Self::BigSerial | Self::BigInt => "bigint",
            Self::Text => "text",
            Self::Varchar(_) => "character varying",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp without time zone",
            Self::Date => "date",
            Self::Numeric(_, _) => "numeric",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDeclaration {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<&'static str>,
    pub references: Option<(&'static str, &'static str)>,
}

impl ColumnDeclaration {
    /// Nullable column of the given type.
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub const fn serial_id(name: &'static str) -> Self {
        Self::new(name, ColumnType::Serial).primary_key()
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn default_value(mut self, expression: &'static str) -> Self {
        self.default = Some(expression);
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some((table, column));
        self
    }

    fn ddl(&self) -> String {
        let mut out = format!("\"{}\" {}", self.name, self.column_type.ddl());
        if self.primary_key {
            out.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if self.unique {
            out.push_str(" UNIQUE");
        }
        if let Some(default) = self.default {
            out.push_str(" DEFAULT ");
            out.push_str(default);
        }
        if let Some((table, column)) = self.references {
            out.push_str(&format!(" REFERENCES \"{table}\" (\"{column}\")"));
        }
        out
    }
}

/// A column as it exists in the database catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnShape {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// One reason an existing table cannot stand in for a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeConflict {
    MissingColumn {
        column: String,
    },
    TypeMismatch {
        column: String,
        declared: String,
        found: String,
    },
    NullabilityMismatch {
        column: String,
        declared_nullable: bool,
    },
}

impl fmt::Display for ShapeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn { column } => write!(f, "column '{column}' is missing"),
            Self::TypeMismatch {
                column,
                declared,
                found,
            } => write!(
                f,
                "column '{column}' has type '{found}', declared '{declared}'"
            ),
            Self::NullabilityMismatch {
                column,
                declared_nullable,
            } => {
                let (declared, found) = if *declared_nullable {
                    ("nullable", "NOT NULL")
                } else {
                    ("NOT NULL", "nullable")
                };
                write!(f, "column '{column}' is {found}, declared {declared}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDeclaration {
    pub name: &'static str,
    pub scope: TableScope,
    pub columns: Vec<ColumnDeclaration>,
}

impl TableDeclaration {
    pub fn new(name: &'static str, scope: TableScope) -> Self {
        Self {
            name,
            scope,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDeclaration) -> Self {
        self.columns.push(column);
        self
    }

    /// Tables this one points at through foreign keys, excluding itself.
    pub fn dependencies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .filter_map(|c| c.references.map(|(table, _)| table))
            .filter(move |table| *table != self.name)
    }

    /// Unqualified DDL; the target namespace comes from the session's search path.
    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(ColumnDeclaration::ddl)
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.name, columns
        )
    }

    /// Columns as the catalog would report them right after creation.
    pub fn expected_shape(&self) -> Vec<ColumnShape> {
        self.columns
            .iter()
            .map(|c| ColumnShape::new(c.name, c.column_type.catalog_name(), c.nullable))
            .collect()
    }

    /// Differences between this declaration and an existing table.
    ///
    /// Extra columns on the existing table are not reported.
    pub fn conflicts(&self, existing: &[ColumnShape]) -> Vec<ShapeConflict> {
        let mut conflicts = Vec::new();

        for declared in &self.columns {
            let Some(found) = existing.iter().find(|c| c.name == declared.name) else {
                conflicts.push(ShapeConflict::MissingColumn {
                    column: declared.name.to_string(),
                });
                continue;
            };

            let declared_type = declared.column_type.catalog_name();
            if !found.data_type.eq_ignore_ascii_case(declared_type) {
                conflicts.push(ShapeConflict::TypeMismatch {
                    column: declared.name.to_string(),
                    declared: declared_type.to_string(),
                    found: found.data_type.clone(),
                });
            }
            if found.nullable != declared.nullable {
                conflicts.push(ShapeConflict::NullabilityMismatch {
                    column: declared.name.to_string(),
                    declared_nullable: declared.nullable,
                });
            }
        }

        conflicts
    }
}

/// A literal value in an inserted row.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedValue {
    Text(Cow<'static, str>),
    Int(i64),
    Bool(bool),
    /// Left out of the statement, so the column takes its default.
    Null,
}

impl SeedValue {
    pub fn text(value: impl Into<Cow<'static, str>>) -> Self {
        Self::Text(value.into())
    }

    /// `Null` for `None`.
    pub fn optional_text(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::text)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Null => f.write_str("NULL"),
        }
    }
}

/// Column/value pairs of one row.
pub type RowValues = Vec<(&'static str, SeedValue)>;

/// `INSERT` for one row into an unqualified table, with `$n` placeholders for
/// the non-null values in row order. With a `conflict_key` the row is skipped
/// when that unique column already holds its value.
pub fn insert_sql(
    table: &str,
    row: &[(&'static str, SeedValue)],
    conflict_key: Option<&str>,
) -> String {
    let present: Vec<&str> = row
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(column, _)| *column)
        .collect();

    let columns = present
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=present.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("INSERT INTO \"{table}\" ({columns}) VALUES ({placeholders})");
    if let Some(key) = conflict_key {
        sql.push_str(&format!(" ON CONFLICT (\"{key}\") DO NOTHING"));
    }
    sql
}

/// Default rows inserted when absent, identified by the value of `key`.
///
/// `key` must name a unique column of `table`.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub table: &'static str,
    pub scope: TableScope,
    pub key: &'static str,
    pub rows: Vec<RowValues>,
}

impl Seed {
    pub fn new(table: &'static str, scope: TableScope, key: &'static str) -> Self {
        Self {
            table,
            scope,
            key,
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, values: RowValues) -> Self {
        self.rows.push(values);
        self
    }

    /// The key value of a row, if the row sets it.
    pub fn key_of<'a>(&self, row: &'a [(&'static str, SeedValue)]) -> Option<&'a SeedValue> {
        row.iter()
            .find(|(column, value)| *column == self.key && !value.is_null())
            .map(|(_, value)| value)
    }

    /// `INSERT ... ON CONFLICT DO NOTHING` for one row.
    pub fn insert_sql(&self, row: &[(&'static str, SeedValue)]) -> String {
        insert_sql(self.table, row, Some(self.key))
    }
}
