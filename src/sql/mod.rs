//! SQL generation and inspection.
//!
//! - [`query`] - SELECT query builder used by the report compiler
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations
//! - [`lexer`] - Tokenizer for author-written SQL
//! - [`raw`] - Clause model of an author-written SELECT

pub mod dialect;
pub mod expr;
pub mod lexer;
pub mod query;
pub mod raw;
pub mod token;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    avg, col, count, count_star, false_predicate, func, lit_int, lit_null, max, min, placeholder,
    star, sum, table_col, BinaryOperator, Expr, ExprExt, Literal, SortDir, UnaryOperator,
};
pub use query::{
    Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, TableFactor, TableRef,
};
pub use raw::{ClauseKind, RawError, RawStatement, TableMention};
pub use token::{Token, TokenStream};
