//! SQLite SQL dialect.
//!
//! Used by the bundled execution backend and the test fixtures.
//! SQLite accepts ANSI quoting and LIMIT/OFFSET, so it mostly
//! relies on the trait defaults.

use super::helpers;
use super::SqlDialect;

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        // No boolean type; true/false are aliases for 1/0 since 3.23
        helpers::format_bool_numeric(b)
    }
}
