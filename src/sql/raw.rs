//! Structural model of an author-written SELECT.
//!
//! [`RawStatement`] tokenizes the text once, records where each top-level
//! clause starts (tracking parenthesis depth, so keywords inside subqueries,
//! string literals and comments never count) and renders the statement back
//! to text with:
//!
//! - `{name}` table references expanded to `<prefix>name`
//! - `:name` placeholders rendered in the dialect's form
//! - added predicates ANDed onto the outermost WHERE (or a new WHERE placed
//!   right after the FROM clause)

use std::collections::BTreeSet;

use thiserror::Error;

use super::dialect::{Dialect, SqlDialect};
use super::expr::Expr;
use super::lexer::{
    is_blank, is_keyword, is_line_comment, is_trivia, next_significant, tokenize, unquoted_word,
    LexError, SqlToken,
};
use super::query::{COUNT_ALIAS, COUNT_COLUMN};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawError {
    #[error("tokenizer error: {0}")]
    Lex(#[from] LexError),

    #[error("unbalanced parentheses")]
    Unbalanced,

    #[error("statement is empty")]
    Empty,
}

pub type RawResult<T> = Result<T, RawError>;

// =============================================================================
// Clauses and table mentions
// =============================================================================

/// Top-level clause kinds, in the order SQL requires them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClauseKind {
    Select,
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
    /// LIMIT / OFFSET / FETCH
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clause {
    kind: ClauseKind,
    /// Index of the clause's first keyword token.
    start: usize,
}

/// A table named after FROM or JOIN, at any nesting depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMention {
    /// Table name as written (dotted names are joined with `.`).
    pub name: String,
    pub alias: Option<String>,
    /// Parenthesis depth; 0 is the outermost statement.
    pub depth: usize,
    /// Written as `{name}`.
    pub braced: bool,
}

impl TableMention {
    /// The name other clauses use to refer to this table.
    pub fn exposed_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Words that end a table reference instead of aliasing it.
const NON_ALIAS_WORDS: &[&str] = &[
    "CROSS", "EXCEPT", "FETCH", "FULL", "GROUP", "HAVING", "INNER", "INTERSECT", "JOIN", "LEFT",
    "LIMIT", "NATURAL", "ON", "ORDER", "OUTER", "RIGHT", "UNION", "USING", "WHERE", "WINDOW",
];

// =============================================================================
// RawStatement
// =============================================================================

/// A tokenized SELECT with its top-level clause boundaries.
#[derive(Debug, Clone)]
pub struct RawStatement {
    dialect: Dialect,
    tokens: Vec<SqlToken>,
    clauses: Vec<Clause>,
    set_operation: bool,
    predicates: Vec<Expr>,
}

impl RawStatement {
    /// Tokenize and index `sql`.
    ///
    /// Surrounding whitespace and a single trailing semicolon are dropped.
    /// Anything else after that semicolon stays in the token list; callers
    /// that accept author SQL run it through the validator first.
    pub fn parse(sql: &str, dialect: Dialect) -> RawResult<Self> {
        let mut tokens = tokenize(sql.trim(), dialect)?;
        while tokens.last().is_some_and(is_blank) {
            tokens.pop();
        }
        if matches!(tokens.last(), Some(SqlToken::SemiColon)) {
            tokens.pop();
            while tokens.last().is_some_and(is_blank) {
                tokens.pop();
            }
        }
        if next_significant(&tokens, 0).is_none() {
            return Err(RawError::Empty);
        }

        let mut clauses = Vec::new();
        let mut set_operation = false;
        let mut depth: usize = 0;
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i] {
                SqlToken::LParen => depth += 1,
                SqlToken::RParen => {
                    depth = depth.checked_sub(1).ok_or(RawError::Unbalanced)?;
                }
                token if depth == 0 => {
                    if let Some(word) = unquoted_word(token) {
                        let kind = match word.as_str() {
                            "SELECT" if clauses.is_empty() => Some(ClauseKind::Select),
                            "FROM" => Some(ClauseKind::From),
                            "WHERE" => Some(ClauseKind::Where),
                            "GROUP" if followed_by(&tokens, i, "BY") => Some(ClauseKind::GroupBy),
                            "HAVING" => Some(ClauseKind::Having),
                            "ORDER" if followed_by(&tokens, i, "BY") => Some(ClauseKind::OrderBy),
                            "LIMIT" | "OFFSET" | "FETCH" => Some(ClauseKind::Limit),
                            "UNION" | "INTERSECT" | "EXCEPT" => {
                                set_operation = true;
                                None
                            }
                            _ => None,
                        };
                        if let Some(kind) = kind {
                            // OFFSET after LIMIT belongs to the same clause
                            let repeated = clauses.last().is_some_and(|c: &Clause| c.kind == kind);
                            if !repeated && !set_operation {
                                clauses.push(Clause { kind, start: i });
                            }
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
        if depth != 0 {
            return Err(RawError::Unbalanced);
        }

        Ok(Self {
            dialect,
            tokens,
            clauses,
            set_operation,
            predicates: Vec::new(),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The statement's tokens, trailing semicolon removed.
    pub fn tokens(&self) -> &[SqlToken] {
        &self.tokens
    }

    /// True when a top-level UNION/INTERSECT/EXCEPT combines several selects.
    pub fn has_set_operation(&self) -> bool {
        self.set_operation
    }

    pub fn has_clause(&self, kind: ClauseKind) -> bool {
        self.clause(kind).is_some()
    }

    fn clause(&self, kind: ClauseKind) -> Option<Clause> {
        self.clauses.iter().copied().find(|c| c.kind == kind)
    }

    /// Token range `[start, end)` of a clause, up to the next top-level clause.
    fn clause_span(&self, kind: ClauseKind) -> Option<(usize, usize)> {
        let pos = self.clauses.iter().position(|c| c.kind == kind)?;
        let end = self
            .clauses
            .get(pos + 1)
            .map(|c| c.start)
            .unwrap_or(self.tokens.len());
        Some((self.clauses[pos].start, end))
    }

    /// Every table referenced after FROM or JOIN, including inside subqueries
    /// and parenthesized join lists.
    ///
    /// FROM only introduces tables in a parenthesis level that has its own
    /// SELECT, so `EXTRACT(YEAR FROM x)` and `IS DISTINCT FROM` are skipped.
    pub fn table_mentions(&self) -> Vec<TableMention> {
        self.scan_tables().mentions
    }

    /// Table positions holding something other than a plain table name:
    /// `[name]` outside T-SQL, a table function call, a literal or a
    /// placeholder. Returned as written.
    pub fn unreadable_tables(&self) -> Vec<String> {
        self.scan_tables().unreadable
    }

    fn scan_tables(&self) -> TableScan {
        let tokens = &self.tokens;
        let mut scan = TableScan::default();
        // One entry per open parenthesis level: has a SELECT been seen there?
        let mut selects = vec![false];
        let mut prev: Option<&SqlToken> = None;
        for (i, token) in tokens.iter().enumerate() {
            let depth = selects.len() - 1;
            match token {
                SqlToken::LParen => selects.push(false),
                SqlToken::RParen => {
                    if selects.len() > 1 {
                        selects.pop();
                    }
                }
                t if is_keyword(t, "SELECT") => {
                    if let Some(top) = selects.last_mut() {
                        *top = true;
                    }
                }
                t if is_keyword(t, "JOIN")
                    || (is_keyword(t, "FROM")
                        && selects[depth]
                        && !prev.is_some_and(|p| is_keyword(p, "DISTINCT"))) =>
                {
                    read_table_list(tokens, i + 1, depth, &mut scan);
                }
                _ => {}
            }
            if !is_trivia(token) {
                prev = Some(token);
            }
        }
        scan
    }

    /// Top-level table mentions only.
    pub fn top_level_tables(&self) -> Vec<TableMention> {
        self.table_mentions()
            .into_iter()
            .filter(|m| m.depth == 0)
            .collect()
    }

    /// Names of all `:name` placeholders, sorted and deduplicated.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for (i, token) in self.tokens.iter().enumerate() {
            if let Some((name, _)) = placeholder_at(&self.tokens, i) {
                names.insert(name);
            }
            if let SqlToken::Placeholder(p) = token {
                if let Some(name) = p.strip_prefix(':') {
                    names.insert(name.to_string());
                }
            }
        }
        names
    }

    /// AND `predicate` onto the outermost WHERE when rendered.
    pub fn add_predicate(&mut self, predicate: Expr) {
        self.predicates.push(predicate);
    }

    /// Render the statement, expanding `{name}` to `<table_prefix>name`.
    pub fn render(&self, table_prefix: &str) -> String {
        self.render_range(table_prefix, 0, self.tokens.len())
    }

    /// `SELECT COUNT(*) AS total FROM (<statement>) AS report_total`.
    ///
    /// A top-level ORDER BY is dropped unless the statement paginates itself.
    pub fn count_sql(&self, table_prefix: &str) -> String {
        let inner = match (self.clause(ClauseKind::OrderBy), self.has_clause(ClauseKind::Limit)) {
            (Some(order_by), false) => self.render_range(table_prefix, 0, order_by.start),
            _ => self.render(table_prefix),
        };
        format!(
            "SELECT COUNT(*) AS {} FROM (\n{}\n) AS {}",
            COUNT_COLUMN,
            inner.trim_end(),
            COUNT_ALIAS
        )
    }

    /// The statement restricted to one page (`page` is 0-based).
    ///
    /// Statements with their own LIMIT are wrapped in a derived table so the
    /// author's limit still applies before paging.
    pub fn paged_sql(&self, table_prefix: &str, page: u64, page_size: u64) -> String {
        let dialect = self.dialect;
        let pagination = dialect
            .emit_limit_offset(Some(page_size), Some(page.saturating_mul(page_size)))
            .serialize(dialect);
        let null_order = "ORDER BY (SELECT NULL)";

        if self.has_clause(ClauseKind::Limit) {
            let mut sql = format!(
                "SELECT * FROM (\n{}\n) AS report_page",
                self.render(table_prefix).trim_end()
            );
            if dialect.requires_order_by_for_offset() {
                sql.push('\n');
                sql.push_str(null_order);
            }
            sql.push('\n');
            sql.push_str(&pagination);
            return sql;
        }

        let mut sql = self.render(table_prefix).trim_end().to_string();
        if self.tokens.last().is_some_and(is_line_comment) {
            sql.push('\n');
        }
        if dialect.requires_order_by_for_offset() && !self.has_clause(ClauseKind::OrderBy) {
            sql.push('\n');
            sql.push_str(null_order);
        }
        sql.push('\n');
        sql.push_str(&pagination);
        sql
    }

    fn render_range(&self, table_prefix: &str, start: usize, end: usize) -> String {
        let predicate = self.predicate_sql();
        let where_span = self.clause_span(ClauseKind::Where);
        // Without a WHERE, the new one goes where the FROM clause ends.
        let insert_at = match (&predicate, where_span, self.clause_span(ClauseKind::From)) {
            (Some(_), None, Some((_, from_end))) => Some(from_end),
            _ => None,
        };

        let mut out = String::new();
        let mut i = start;
        while i < end {
            if insert_at == Some(i) {
                if let Some(p) = &predicate {
                    out.push_str("WHERE ");
                    out.push_str(p);
                    out.push(' ');
                }
            }

            if let (Some(p), Some((w_start, w_end))) = (&predicate, where_span) {
                if i == w_start {
                    let body_end = w_end.min(end);
                    out.push_str(&self.tokens[w_start].to_string());
                    out.push_str(" (");
                    let body = self.render_plain(table_prefix, w_start + 1, body_end);
                    let trimmed = body.trim();
                    out.push_str(trimmed);
                    let ends_in_comment = (w_start + 1..body_end)
                        .rev()
                        .find(|&k| !is_blank(&self.tokens[k]))
                        .is_some_and(|k| is_line_comment(&self.tokens[k]));
                    if ends_in_comment && !trimmed.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(") AND ");
                    out.push_str(p);
                    if body_end < end {
                        out.push(' ');
                    }
                    i = body_end;
                    continue;
                }
            }

            let (text, consumed) = self.render_token(table_prefix, i);
            out.push_str(&text);
            i += consumed;
        }

        // The FROM clause runs to the end of the rendered range.
        if insert_at == Some(end) {
            if let Some(p) = &predicate {
                let kept = out.trim_end().len();
                out.truncate(kept);
                out.push_str("\nWHERE ");
                out.push_str(p);
            }
        }
        out
    }

    fn render_plain(&self, table_prefix: &str, start: usize, end: usize) -> String {
        let mut out = String::new();
        let mut i = start;
        while i < end {
            let (text, consumed) = self.render_token(table_prefix, i);
            out.push_str(&text);
            i += consumed;
        }
        out
    }

    /// Render the token at `i`, returning the text and how many tokens it used.
    fn render_token(&self, table_prefix: &str, i: usize) -> (String, usize) {
        if let Some((name, len)) = braced_table_at(&self.tokens, i) {
            let table = format!("{}{}", table_prefix, name);
            return (self.dialect.format_identifier(&table), len);
        }
        if let Some((name, len)) = placeholder_at(&self.tokens, i) {
            return (self.dialect.format_placeholder(&name), len);
        }
        if let SqlToken::Placeholder(p) = &self.tokens[i] {
            if let Some(name) = p.strip_prefix(':') {
                return (self.dialect.format_placeholder(name), 1);
            }
        }
        (self.tokens[i].to_string(), 1)
    }

    fn predicate_sql(&self) -> Option<String> {
        let mut iter = self.predicates.iter();
        let first = iter.next()?;
        let mut sql = first.to_tokens().serialize(self.dialect);
        for p in iter {
            sql.push_str(" AND ");
            sql.push_str(&p.to_tokens().serialize(self.dialect));
        }
        Some(sql)
    }
}

// =============================================================================
// Token pattern helpers
// =============================================================================

fn followed_by(tokens: &[SqlToken], i: usize, keyword: &str) -> bool {
    next_significant(tokens, i + 1).is_some_and(|n| is_keyword(&tokens[n], keyword))
}

/// `{name}` at `i`: returns the name and the number of tokens spanned.
fn braced_table_at(tokens: &[SqlToken], i: usize) -> Option<(String, usize)> {
    match (tokens.get(i), tokens.get(i + 1), tokens.get(i + 2)) {
        (Some(SqlToken::LBrace), Some(SqlToken::Word(w)), Some(SqlToken::RBrace))
            if w.quote_style.is_none() =>
        {
            Some((w.value.clone(), 3))
        }
        _ => None,
    }
}

/// `:name` at `i` (colon immediately followed by a word).
fn placeholder_at(tokens: &[SqlToken], i: usize) -> Option<(String, usize)> {
    match (tokens.get(i), tokens.get(i + 1)) {
        (Some(SqlToken::Colon), Some(SqlToken::Word(w))) if w.quote_style.is_none() => {
            Some((w.value.clone(), 2))
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
struct TableScan {
    mentions: Vec<TableMention>,
    unreadable: Vec<String>,
}

/// Read `a, b, ...` starting at `from`. JOINs are picked up by the caller.
fn read_table_list(tokens: &[SqlToken], from: usize, depth: usize, scan: &mut TableScan) {
    let mut at = from;
    while let Some(next) = read_table_ref(tokens, at, depth, scan) {
        match next_significant(tokens, next) {
            Some(comma) if tokens[comma] == SqlToken::Comma => at = comma + 1,
            _ => break,
        }
    }
}

/// Read one table reference starting at `from`, recording it in `scan`.
///
/// Returns the index after the reference and its alias, or `None` when
/// there is nothing more to read. Derived tables (`(SELECT ...)`) are
/// skipped here; their own FROM is visited separately. A parenthesized
/// table or join list has its first table read here at `depth + 1`.
fn read_table_ref(
    tokens: &[SqlToken],
    from: usize,
    depth: usize,
    scan: &mut TableScan,
) -> Option<usize> {
    let start = next_significant(tokens, from)?;

    if tokens[start] == SqlToken::LParen {
        let Some(close) = matching_paren(tokens, start) else {
            scan.unreadable.push("(".to_string());
            return None;
        };
        let derived = next_significant(tokens, start + 1)
            .is_some_and(|n| is_keyword(&tokens[n], "SELECT"));
        if !derived {
            read_table_list(tokens, start + 1, depth + 1, scan);
        }
        let (_, next) = read_alias(tokens, close + 1);
        return Some(next);
    }

    let (name, braced, next) = if let Some((name, len)) = braced_table_at(tokens, start) {
        (name, true, start + len)
    } else {
        let SqlToken::Word(first) = &tokens[start] else {
            scan.unreadable.push(unreadable_text(tokens, start));
            return None;
        };
        let mut name = first.value.clone();
        let mut next = start + 1;
        // schema.table
        while let (Some(SqlToken::Period), Some(SqlToken::Word(part))) =
            (tokens.get(next), tokens.get(next + 1))
        {
            name.push('.');
            name.push_str(&part.value);
            next += 2;
        }
        (name, false, next)
    };

    // generate_series(...), pragma_table_info(...)
    if next_significant(tokens, next).is_some_and(|n| tokens[n] == SqlToken::LParen) {
        scan.unreadable.push(format!("{}(", name));
        return None;
    }

    let (alias, next) = read_alias(tokens, next);
    scan.mentions.push(TableMention {
        name,
        alias,
        depth,
        braced,
    });
    Some(next)
}

/// An optional `[AS] alias` at `from`.
fn read_alias(tokens: &[SqlToken], from: usize) -> (Option<String>, usize) {
    let Some(k) = next_significant(tokens, from) else {
        return (None, from);
    };
    let mut candidate = k;
    if is_keyword(&tokens[k], "AS") {
        candidate = next_significant(tokens, k + 1).unwrap_or(tokens.len());
    }
    match tokens.get(candidate) {
        Some(SqlToken::Word(w))
            if w.quote_style.is_some()
                || !NON_ALIAS_WORDS.contains(&w.value.to_ascii_uppercase().as_str()) =>
        {
            (Some(w.value.clone()), candidate + 1)
        }
        _ => (None, from),
    }
}

/// Index of the `)` closing the `(` at `open`.
fn matching_paren(tokens: &[SqlToken], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (k, token) in tokens.iter().enumerate().skip(open) {
        match token {
            SqlToken::LParen => depth += 1,
            SqlToken::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(k);
                }
            }
            _ => {}
        }
    }
    None
}

/// Text of an unreadable table position; `[name]` is kept whole.
fn unreadable_text(tokens: &[SqlToken], start: usize) -> String {
    if tokens[start] != SqlToken::LBracket {
        return tokens[start].to_string();
    }
    let mut text = String::new();
    for token in &tokens[start..] {
        text.push_str(&token.to_string());
        if *token == SqlToken::RBracket {
            break;
        }
    }
    text
}

// =============================================================================
// Tests
// =============================================================================
