//! Test utilities for SQL emission validation.
//!
//! Provides helpers for validating that emitted SQL is syntactically correct
//! using sqlparser-rs for roundtrip validation.

use sqlparser::parser::Parser;

use super::dialect::Dialect;
use super::lexer::parser_dialect;

/// Validates that a SQL string is syntactically valid for the given dialect.
///
/// Uses sqlparser-rs to parse the SQL and returns an error if parsing fails.
///
/// # Example
///
/// ```ignore
/// use crate::sql::test_utils::validate_sql;
/// use crate::sql::dialect::Dialect;
///
/// let sql = "SELECT * FROM course";
/// validate_sql(sql, Dialect::Postgres).unwrap();
/// ```
pub fn validate_sql(sql: &str, dialect: Dialect) -> Result<(), String> {
    let parser_dialect = parser_dialect(dialect);

    Parser::parse_sql(&*parser_dialect, sql)
        .map(|_| ())
        .map_err(|e| format!("Invalid SQL for {:?}: {}\nSQL: {}", dialect, e, sql))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::{count, placeholder, table_col, ExprExt};
    use crate::sql::query::{OrderByExpr, Query, TableRef};

    #[test]
    fn test_validate_valid_sql() {
        validate_sql("SELECT * FROM course", Dialect::Postgres).unwrap();
        validate_sql("SELECT * FROM course", Dialect::MySql).unwrap();
        validate_sql("SELECT * FROM course", Dialect::Sqlite).unwrap();
    }

    #[test]
    fn test_validate_invalid_sql() {
        let result = validate_sql("SELEC * FORM course", Dialect::Postgres);
        assert!(result.is_err());
    }

    #[test]
    fn test_built_query_parses_in_every_dialect() {
        let query = Query::new()
            .select(vec![
                table_col("c", "fullname").alias("fullname"),
                count(table_col("e", "id")).alias("enrolled"),
            ])
            .from(TableRef::new("course").with_alias("c"))
            .left_join(
                TableRef::new("enrolment").with_alias("e"),
                table_col("c", "id").eq(table_col("e", "course_id")),
            )
            .filter(table_col("c", "visible").eq(placeholder("visible")))
            .group_by(vec![table_col("c", "fullname")])
            .order_by(vec![OrderByExpr::desc(table_col("c", "fullname"))]);

        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::TSql, Dialect::Sqlite] {
            let sql = query.paged(1, 20).to_sql(dialect);
            validate_sql(&sql, dialect).unwrap();
            let sql = query.count_query().to_sql(dialect);
            validate_sql(&sql, dialect).unwrap();
        }
    }
}
