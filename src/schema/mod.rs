//! Schema whitelist registry.
//!
//! The closed set of tables and columns report definitions may reference.
//! Everything that turns author input into SQL asks this registry first, and
//! a `false` answer is always a hard failure for the caller.
//!
//! Names are matched case-insensitively and stored lowercase. The whitelist
//! is loaded from TOML:
//!
//! ```toml
//! [tables.course]
//! label = "Courses"
//! columns = ["id", "fullname", "visible"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::sql::dialect::helpers::is_plain_identifier;

/// Built-in learning-platform schema.
const DEFAULT_SCHEMA: &str = include_str!("default_schema.toml");

/// Error type for whitelist loading.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read whitelist file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse whitelist: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid identifier in whitelist: '{0}'")]
    InvalidIdentifier(String),

    #[error("Table '{0}' has no columns")]
    EmptyTable(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// One whitelisted table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableEntry {
    pub label: Option<String>,
    pub columns: BTreeSet<String>,
}

/// Registry of allowed tables and their allowed columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaWhitelist {
    tables: BTreeMap<String, TableEntry>,
}

#[derive(Debug, Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    tables: BTreeMap<String, TableSection>,
}

#[derive(Debug, Deserialize)]
struct TableSection {
    label: Option<String>,
    columns: Vec<String>,
}

impl SchemaWhitelist {
    /// An empty whitelist (allows nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in learning-platform schema.
    pub fn builtin() -> SchemaResult<Self> {
        Self::from_toml_str(DEFAULT_SCHEMA)
    }

    /// Parse a whitelist from TOML text.
    pub fn from_toml_str(content: &str) -> SchemaResult<Self> {
        let file: WhitelistFile = toml::from_str(content)?;
        let mut whitelist = Self::new();
        for (name, section) in file.tables {
            whitelist.insert_table(&name, section.label, section.columns)?;
        }
        Ok(whitelist)
    }

    /// Load a whitelist from a TOML file.
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Add or replace a table.
    pub fn insert_table<I, S>(
        &mut self,
        name: &str,
        label: Option<String>,
        columns: I,
    ) -> SchemaResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = normalize(name)?;
        let columns = columns
            .into_iter()
            .map(|c| normalize(c.as_ref()))
            .collect::<SchemaResult<BTreeSet<_>>>()?;
        if columns.is_empty() {
            return Err(SchemaError::EmptyTable(table));
        }
        self.tables.insert(table, TableEntry { label, columns });
        Ok(())
    }

    /// Builder form of [`insert_table`](Self::insert_table).
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> SchemaResult<Self> {
        self.insert_table(name, None, columns.iter())?;
        Ok(self)
    }

    pub fn is_table_allowed(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_column_allowed(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(&table.to_ascii_lowercase())
            .is_some_and(|t| t.columns.contains(&column.to_ascii_lowercase()))
    }

    /// Allowed table names in sorted order.
    pub fn allowed_tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn normalize(ident: &str) -> SchemaResult<String> {
    if is_plain_identifier(ident) {
        Ok(ident.to_ascii_lowercase())
    } else {
        Err(SchemaError::InvalidIdentifier(ident.to_string()))
    }
}
