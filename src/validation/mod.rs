//! SQL validator for author-written report SQL.
//!
//! Rules, checked in order (the first failure wins):
//!
//! 1. The statement starts with `SELECT` (after whitespace and comments).
//! 2. Nothing but whitespace follows a semicolon.
//! 3. No unquoted word outside literals and comments is a blocked keyword.
//! 4. Every table after FROM/JOIN, at any depth and inside parenthesized
//!    join lists, is whitelisted. A table position holding anything other
//!    than a plain name (`[x]` outside T-SQL, a function call, a literal) is
//!    rejected the same way.
//!
//! Rejection is final: nothing is rewritten or repaired.

use crate::schema::SchemaWhitelist;
use crate::sql::dialect::Dialect;
use crate::sql::lexer::{is_blank, is_trivia, tokenize, unquoted_word, SqlToken};
use crate::sql::raw::{RawError, RawStatement};

/// Keywords that may never appear as bare words in report SQL.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
    "EXEC", "EXECUTE", "CALL", "MERGE", "REPLACE",
];

/// Why a statement was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("not-a-select")]
    NotASelect,

    #[error("multiple-statements")]
    MultipleStatements,

    #[error("blocked-keyword:{0}")]
    BlockedKeyword(String),

    #[error("disallowed-table:{0}")]
    DisallowedTable(String),

    /// The text could not be tokenized (unterminated literal, unbalanced
    /// parentheses, ...).
    #[error("malformed:{0}")]
    Malformed(String),
}

impl ValidationError {
    /// The closed reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::NotASelect => "not-a-select",
            ValidationError::MultipleStatements => "multiple-statements",
            ValidationError::BlockedKeyword(_) => "blocked-keyword",
            ValidationError::DisallowedTable(_) => "disallowed-table",
            ValidationError::Malformed(_) => "malformed",
        }
    }

    /// Human-readable detail for the report author.
    pub fn detail(&self) -> String {
        match self {
            ValidationError::NotASelect => "only a single SELECT statement is allowed".into(),
            ValidationError::MultipleStatements => {
                "content found after a terminating semicolon".into()
            }
            ValidationError::BlockedKeyword(word) => format!("keyword {} is not allowed", word),
            ValidationError::DisallowedTable(table) => {
                format!("table '{}' is not in the schema whitelist", table)
            }
            ValidationError::Malformed(msg) => msg.clone(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates raw SQL against the safety rules and a whitelist.
#[derive(Debug, Clone, Copy)]
pub struct SqlValidator<'a> {
    whitelist: &'a SchemaWhitelist,
    dialect: Dialect,
    table_prefix: &'a str,
}

impl<'a> SqlValidator<'a> {
    pub fn new(whitelist: &'a SchemaWhitelist, dialect: Dialect) -> Self {
        Self {
            whitelist,
            dialect,
            table_prefix: "",
        }
    }

    /// Accept `<prefix>name` spellings of whitelisted tables as well as `{name}`.
    pub fn with_table_prefix(mut self, prefix: &'a str) -> Self {
        self.table_prefix = prefix;
        self
    }

    /// Check `sql`; on success return its clause model for rendering.
    pub fn validate(&self, sql: &str) -> ValidationResult<RawStatement> {
        let tokens =
            tokenize(sql, self.dialect).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        // 1. SELECT first
        let first = tokens.iter().find(|t| !is_trivia(t));
        if !first.is_some_and(|t| unquoted_word(t).as_deref() == Some("SELECT")) {
            return Err(ValidationError::NotASelect);
        }

        // 2. Nothing after a semicolon but whitespace
        if let Some(semi) = tokens.iter().position(|t| *t == SqlToken::SemiColon) {
            if tokens[semi + 1..].iter().any(|t| !is_blank(t)) {
                return Err(ValidationError::MultipleStatements);
            }
        }

        // 3. Blocked keywords, as whole unquoted words
        for token in &tokens {
            if let Some(word) = unquoted_word(token) {
                if BLOCKED_KEYWORDS.contains(&word.as_str()) {
                    return Err(ValidationError::BlockedKeyword(word));
                }
            }
        }

        let statement = RawStatement::parse(sql, self.dialect).map_err(|e| match e {
            RawError::Empty => ValidationError::NotASelect,
            other => ValidationError::Malformed(other.to_string()),
        })?;

        // 4. Whitelisted tables only; anything that is not a plain name fails
        if let Some(text) = statement.unreadable_tables().into_iter().next() {
            return Err(ValidationError::DisallowedTable(text));
        }
        for mention in statement.table_mentions() {
            if !self.is_table_allowed(&mention.name, mention.braced) {
                return Err(ValidationError::DisallowedTable(
                    mention.name.to_ascii_lowercase(),
                ));
            }
        }

        tracing::debug!(tables = statement.table_mentions().len(), "raw SQL validated");
        Ok(statement)
    }

    fn is_table_allowed(&self, name: &str, braced: bool) -> bool {
        if braced || self.table_prefix.is_empty() {
            return self.whitelist.is_table_allowed(name);
        }
        let lower = name.to_ascii_lowercase();
        match lower.strip_prefix(&self.table_prefix.to_ascii_lowercase()) {
            Some(unprefixed) => self.whitelist.is_table_allowed(unprefixed),
            None => false,
        }
    }
}
