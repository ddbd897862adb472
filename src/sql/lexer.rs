//! Tokenization of author-supplied SQL.
//!
//! Wraps the `sqlparser` tokenizer so that string literals, quoted
//! identifiers and comments are recognised as single tokens. Keyword checks
//! downstream only ever look at unquoted words, so `'DROP'` or `"update"`
//! or `update_log` never match a keyword.

use sqlparser::dialect::{MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Tokenizer, Whitespace};

use super::dialect::Dialect;

pub use sqlparser::tokenizer::Token as SqlToken;

/// Tokenizer failure (unterminated string literal, stray quote, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LexError(pub String);

pub type LexResult<T> = Result<T, LexError>;

/// The `sqlparser` dialect used to tokenize and parse SQL for `dialect`.
pub fn parser_dialect(dialect: Dialect) -> Box<dyn sqlparser::dialect::Dialect> {
    match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Tokenize `sql`, keeping whitespace and comments.
///
/// Literals are not unescaped so that every token displays exactly as it
/// was written.
pub fn tokenize(sql: &str, dialect: Dialect) -> LexResult<Vec<SqlToken>> {
    let parser_dialect = parser_dialect(dialect);
    Tokenizer::new(&*parser_dialect, sql)
        .with_unescape(false)
        .tokenize()
        .map_err(|e| LexError(e.to_string()))
}

/// Whitespace or comment.
pub fn is_trivia(token: &SqlToken) -> bool {
    matches!(token, SqlToken::Whitespace(_))
}

/// Plain whitespace (space, newline, tab); comments excluded.
pub fn is_blank(token: &SqlToken) -> bool {
    matches!(
        token,
        SqlToken::Whitespace(Whitespace::Space | Whitespace::Newline | Whitespace::Tab)
    )
}

/// A `--` or `#` comment, which runs to the end of its line.
pub fn is_line_comment(token: &SqlToken) -> bool {
    matches!(token, SqlToken::Whitespace(Whitespace::SingleLineComment { .. }))
}

/// The uppercased text of an unquoted word, or `None`.
pub fn unquoted_word(token: &SqlToken) -> Option<String> {
    match token {
        SqlToken::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// True when `token` is the unquoted keyword `keyword` (uppercase).
pub fn is_keyword(token: &SqlToken, keyword: &str) -> bool {
    matches!(token, SqlToken::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
}

/// Index of the next non-trivia token at or after `from`.
pub fn next_significant(tokens: &[SqlToken], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !is_trivia(&tokens[i]))
}
