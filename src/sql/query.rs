//! Query builder - construct SELECT statements with a fluent API.
//!
//! Compiled reports are assembled as a [`Query`] value with one typed field
//! per clause and serialized exactly once, so a predicate added after
//! compilation always lands in the outermost WHERE.

use std::collections::BTreeSet;

use super::dialect::{Dialect, SqlDialect};
use super::expr::{count_star, BinaryOperator, Expr, ExprExt, SortDir};
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = self.expr.to_tokens();
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Table Reference
// =============================================================================

/// A table reference with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name other clauses use to refer to this table.
    pub fn exposed_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.table.clone()));
        if let Some(alias) = &self.alias {
            // `course AS course` is noise
            if alias != &self.table {
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
            }
        }
        ts
    }
}

/// A FROM source: a named table or a derived table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFactor {
    Table(TableRef),
    Derived { query: Box<Query>, alias: String },
}

impl TableFactor {
    fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        match self {
            TableFactor::Table(table) => table.to_tokens(),
            TableFactor::Derived { query, alias } => {
                let mut ts = TokenStream::new();
                ts.lparen()
                    .newline()
                    .append(&query.to_tokens_for_dialect(dialect))
                    .newline()
                    .rparen()
                    .space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
                ts
            }
        }
    }
}

impl From<TableRef> for TableFactor {
    fn from(table: TableRef) -> Self {
        TableFactor::Table(table)
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expr,
}

impl Join {
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        match self.join_type {
            JoinType::Inner => ts.push(Token::Inner),
            JoinType::Left => ts.push(Token::Left),
        };

        ts.space().push(Token::Join).space();
        ts.append(&self.table.to_tokens());
        ts.space().push(Token::On).space();
        ts.append(&self.on.to_tokens());

        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// An ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: SortDir,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Desc,
        }
    }

    /// Direction is always explicit in the output.
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = self.expr.to_tokens();
        ts.space().push(match self.dir {
            SortDir::Asc => Token::Asc,
            SortDir::Desc => Token::Desc,
        });
        ts
    }
}

// =============================================================================
// LIMIT / OFFSET
// =============================================================================

/// LIMIT and OFFSET clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOffset {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LimitOffset {
    /// Convert to token stream using dialect-specific pagination.
    ///
    /// Delegates to `SqlDialect::emit_limit_offset()` for the actual formatting.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        dialect.emit_limit_offset(self.limit, self.offset)
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql() or to_tokens()"]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub from: Option<TableFactor>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit_offset: Option<LimitOffset>,
}

/// Alias of the derived table wrapped by [`Query::count_query`].
pub const COUNT_ALIAS: &str = "report_total";

/// Output column of [`Query::count_query`].
pub const COUNT_COLUMN: &str = "total";

impl Query {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SELECT list.
    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    /// Set the FROM source.
    pub fn from(mut self, table: impl Into<TableFactor>) -> Self {
        self.from = Some(table.into());
        self
    }

    /// Add a JOIN.
    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Expr) -> Self {
        self.joins.push(Join {
            join_type,
            table,
            on,
        });
        self
    }

    /// Add an INNER JOIN.
    pub fn inner_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinType::Inner, table, on)
    }

    /// Add a LEFT JOIN.
    pub fn left_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinType::Left, table, on)
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: Expr) -> Self {
        self.and_where(condition);
        self
    }

    /// AND a predicate onto the WHERE clause in place.
    ///
    /// A top-level OR in the existing condition is parenthesized first so
    /// that it cannot absorb the new predicate.
    pub fn and_where(&mut self, condition: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(
                existing @ Expr::BinaryOp {
                    op: BinaryOperator::Or,
                    ..
                },
            ) => existing.paren().and(condition),
            Some(existing) => existing.and(condition),
            None => condition,
        });
    }

    /// Set the GROUP BY clause.
    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    /// Set the ORDER BY clause.
    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit_offset.get_or_insert_with(Default::default).limit = Some(limit);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, offset: u64) -> Self {
        self.limit_offset.get_or_insert_with(Default::default).offset = Some(offset);
        self
    }

    /// Tables visible at this query's top level (FROM and JOINs).
    pub fn top_level_tables(&self) -> impl Iterator<Item = &TableRef> {
        let from = match &self.from {
            Some(TableFactor::Table(t)) => Some(t),
            _ => None,
        };
        from.into_iter().chain(self.joins.iter().map(|j| &j.table))
    }

    /// `SELECT COUNT(*) AS total FROM (<this query>) AS report_total`
    ///
    /// Ordering and pagination are dropped from the inner query; every
    /// predicate is kept.
    pub fn count_query(&self) -> Query {
        let mut inner = self.clone();
        inner.order_by.clear();
        inner.limit_offset = None;
        Query::new()
            .select(vec![count_star().alias(COUNT_COLUMN)])
            .from(TableFactor::Derived {
                query: Box::new(inner),
                alias: COUNT_ALIAS.into(),
            })
    }

    /// This query restricted to one page (`page` is 0-based).
    pub fn paged(&self, page: u64, page_size: u64) -> Query {
        self.clone()
            .limit(page_size)
            .offset(page.saturating_mul(page_size))
    }

    /// Collect every placeholder name used anywhere in the query.
    pub fn collect_placeholders(&self, out: &mut BTreeSet<String>) {
        for item in &self.select {
            item.expr.collect_placeholders(out);
        }
        if let Some(TableFactor::Derived { query, .. }) = &self.from {
            query.collect_placeholders(out);
        }
        for join in &self.joins {
            join.on.collect_placeholders(out);
        }
        if let Some(w) = &self.where_clause {
            w.collect_placeholders(out);
        }
        for g in &self.group_by {
            g.collect_placeholders(out);
        }
    }

    /// Convert to a single-line token stream, used for subqueries.
    ///
    /// Pagination is not rendered; subqueries never carry it.
    pub fn to_inline_tokens(&self) -> TokenStream {
        self.render(Dialect::default(), false)
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        self.render(dialect, true)
    }

    fn render(&self, dialect: Dialect, multiline: bool) -> TokenStream {
        let mut ts = TokenStream::new();
        let brk = |ts: &mut TokenStream| {
            if multiline {
                ts.newline();
            } else {
                ts.space();
            }
        };

        // SELECT
        ts.push(Token::Select);
        for (i, select_expr) in self.select.iter().enumerate() {
            if i > 0 {
                ts.comma();
            }
            if multiline {
                ts.newline().indent(1);
            } else {
                ts.space();
            }
            ts.append(&select_expr.to_tokens());
        }

        // FROM
        if let Some(from) = &self.from {
            brk(&mut ts);
            ts.push(Token::From).space();
            ts.append(&from.to_tokens(dialect));
        }

        // JOINs
        for join in &self.joins {
            brk(&mut ts);
            ts.append(&join.to_tokens());
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            brk(&mut ts);
            ts.push(Token::Where).space();
            ts.append(&where_clause.to_tokens());
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            brk(&mut ts);
            ts.push(Token::GroupBy).space();
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&expr.to_tokens());
            }
        }

        // ORDER BY
        // T-SQL requires ORDER BY for OFFSET FETCH syntax. If ORDER BY is missing
        // but we paginate, emit ORDER BY (SELECT NULL).
        if !self.order_by.is_empty() {
            brk(&mut ts);
            ts.push(Token::OrderBy).space();
            for (i, order_expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&order_expr.to_tokens());
            }
        } else if multiline
            && dialect.requires_order_by_for_offset()
            && self.limit_offset.is_some()
        {
            ts.newline()
                .push(Token::OrderBy)
                .space()
                .lparen()
                .push(Token::Select)
                .space()
                .push(Token::Null)
                .rparen();
        }

        // LIMIT / OFFSET
        if multiline {
            if let Some(lo) = &self.limit_offset {
                ts.newline();
                ts.append(&lo.to_tokens(dialect));
            }
        }

        ts
    }

    /// Generate SQL string for a specific dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }
}

impl std::fmt::Display for Query {
    /// Formats the query using the default dialect (Postgres).
    ///
    /// For dialect-specific SQL, use [`Query::to_sql`] instead.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql(Dialect::default()))
    }
}

// =============================================================================
// Tests
// =============================================================================
