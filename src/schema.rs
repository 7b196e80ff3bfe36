//! Schema types and DDL generation for sqlite-supasync.
//!
//! Nothing here creates tables. The sink table is expected to exist; its
//! definition only feeds the CREATE TABLE hint shown when it does not.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Table definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a new table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column.
    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    /// Builder-style column add.
    pub fn with_column(mut self, column: Column) -> Self {
        self.add_column(column);
        self
    }

    /// Generate CREATE TABLE DDL for PostgreSQL (the Supabase SQL editor).
    ///
    /// Identifiers are always quoted: the table and its columns are
    /// upper-case and PostgreSQL folds unquoted names to lower case.
    pub fn to_postgres_ddl(&self) -> String {
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n",
            quote_ident(&self.name)
        );

        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                format!(
                    "    {} {}{}",
                    quote_ident(&c.name),
                    c.column_type.to_postgres(),
                    c.constraints_ddl()
                )
            })
            .collect();

        ddl.push_str(&col_defs.join(",\n"));
        ddl.push_str("\n);");
        ddl
    }
}

/// The remote reviews table the sync writes into.
///
/// `primary_key` names the key column; the remaining columns are fixed.
pub fn reviews_table(name: &str, primary_key: &str) -> Table {
    Table::new(name)
        .with_column(Column::new(primary_key, ColumnType::Serial).primary_key(true))
        .with_column(Column::new("REVIEW", ColumnType::Text))
        .with_column(Column::new("RATING", ColumnType::Numeric))
        .with_column(Column::new(
            "AUTHOR",
            ColumnType::Varchar {
                max_length: Some(255),
            },
        ))
        .with_column(Column::new("TITLE", ColumnType::Text))
}

/// Column definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column type
    pub column_type: ColumnType,
    /// Is nullable
    pub nullable: bool,
    /// Default value
    pub default: Option<String>,
    /// Is the primary key
    pub primary_key: bool,
}

impl Column {
    /// Create a new column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    /// Mark as primary key.
    pub fn primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Generate constraint DDL.
    fn constraints_ddl(&self) -> String {
        let mut constraints = Vec::new();

        if self.primary_key {
            constraints.push("PRIMARY KEY".to_string());
        } else if !self.nullable {
            constraints.push("NOT NULL".to_string());
        }

        if let Some(ref default) = self.default {
            constraints.push(format!("DEFAULT {}", default));
        }

        if constraints.is_empty() {
            String::new()
        } else {
            format!(" {}", constraints.join(" "))
        }
    }
}

/// Column types used on either side of the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Auto-incrementing integer
    Serial,
    /// Integer (8 bytes)
    BigInt,
    /// Integer (4 bytes)
    Integer,
    /// Double precision float
    Double,
    /// Arbitrary precision number
    Numeric,
    /// Variable-length string
    Varchar {
        /// Maximum length (None = unlimited)
        max_length: Option<u32>,
    },
    /// Text (unlimited length)
    Text,
    /// Boolean
    Boolean,
    /// Binary data
    Blob,
}

impl ColumnType {
    /// Convert to PostgreSQL type string.
    pub fn to_postgres(&self) -> String {
        match self {
            ColumnType::Serial => "SERIAL".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::Double => "DOUBLE PRECISION".into(),
            ColumnType::Numeric => "NUMERIC".into(),
            ColumnType::Varchar {
                max_length: Some(n),
            } => format!("VARCHAR({})", n),
            ColumnType::Varchar { max_length: None } => "VARCHAR".into(),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Blob => "BYTEA".into(),
        }
    }

    /// Map a SQLite declared type using SQLite's affinity rules.
    pub fn from_sqlite(decl_type: &str) -> Self {
        let normalized = decl_type.to_uppercase();
        if normalized.contains("INT") {
            ColumnType::BigInt
        } else if normalized.starts_with("VARCHAR") || normalized.starts_with("CHARACTER") {
            ColumnType::Varchar {
                max_length: parse_length(&normalized),
            }
        } else if normalized.contains("CHAR")
            || normalized.contains("CLOB")
            || normalized.contains("TEXT")
        {
            ColumnType::Text
        } else if normalized.contains("BLOB") || normalized.is_empty() {
            ColumnType::Blob
        } else if normalized.contains("REAL")
            || normalized.contains("FLOA")
            || normalized.contains("DOUB")
        {
            ColumnType::Double
        } else if normalized.starts_with("BOOL") {
            ColumnType::Boolean
        } else {
            ColumnType::Numeric
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_postgres())
    }
}

fn parse_length(decl_type: &str) -> Option<u32> {
    let start = decl_type.find('(')?;
    let end = decl_type[start..].find(')')? + start;
    decl_type[start + 1..end].trim().parse().ok()
}

/// Quote an identifier for SQL (both SQLite and PostgreSQL accept this form).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column as reported by SQLite's `PRAGMA table_info`.
#[derive(Debug, Clone, Serialize)]
pub struct IntrospectedColumn {
    /// Column name
    pub name: String,
    /// Declared type (may be empty)
    pub decl_type: String,
    /// Is nullable
    pub nullable: bool,
    /// Default value expression
    pub default: Option<String>,
    /// Is part of the primary key
    pub is_primary_key: bool,
}

impl IntrospectedColumn {
    /// Convert to Column.
    pub fn to_column(&self) -> Column {
        Column {
            name: self.name.clone(),
            column_type: ColumnType::from_sqlite(&self.decl_type),
            nullable: self.nullable,
            default: self.default.clone(),
            primary_key: self.is_primary_key,
        }
    }
}
