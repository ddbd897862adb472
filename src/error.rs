//! Crate-level error taxonomy.
//!
//! Definition errors (validation, compile, most scope failures) are terminal
//! and reported to the author verbatim. Execution errors are reported with a
//! generic message; their detail goes to the log.

use std::time::Duration;

use serde::Serialize;

use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::compile::CompileError;
use crate::config::SettingsError;
use crate::report::UnknownReport;
use crate::schema::SchemaError;
use crate::sql::Dialect;
use crate::tenant::ScopeError;
use crate::validation::ValidationError;

/// Failure while running a prepared query against the store.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("query exceeded the {0:?} timeout")]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The COUNT query did not return a single non-negative integer.
    #[error("count query returned no total")]
    MissingTotal,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    #[error("tenant scoping failed: {0}")]
    Scope(#[from] ScopeError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// The admission gate is full.
    #[error("too many reports are running")]
    Busy,

    #[error(transparent)]
    UnknownReport(#[from] UnknownReport),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Failure while assembling an executor from settings.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to open database: {0}")]
    Backend(#[from] BackendError),

    #[error("failed to open result cache: {0}")]
    Cache(#[from] CacheError),

    #[error("no database path configured (set database.path)")]
    MissingDatabase,

    /// The configured dialect does not match the SQLite backend.
    #[error("database.dialect is '{0}' but the backend is SQLite (set dialect = \"sqlite\")")]
    DialectMismatch(Dialect),
}

/// The external error shape: `{ "ok": false, "reason": ..., "detail": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub ok: bool,
    pub reason: String,
    pub detail: String,
}

impl ReportError {
    /// A bad report definition: never retried, shown to the author.
    pub fn is_definition_error(&self) -> bool {
        match self {
            ReportError::Validation(_) | ReportError::Compile(_) => true,
            ReportError::Scope(e) => e.is_definition_error(),
            _ => false,
        }
    }

    /// Transient; the caller may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReportError::Busy | ReportError::Execution(ExecutionError::Timeout(_))
        )
    }

    pub fn to_report(&self) -> ErrorReport {
        let (reason, detail) = match self {
            ReportError::Validation(ValidationError::Malformed(msg)) => {
                ("malformed".to_string(), msg.clone())
            }
            ReportError::Validation(e) => (e.to_string(), e.detail()),
            ReportError::Compile(e) => (e.reason().to_string(), e.to_string()),
            ReportError::Scope(ScopeError::Membership(cause)) => {
                tracing::error!(%cause, "membership lookup failed");
                (
                    "scope-membership".to_string(),
                    "organisational memberships could not be resolved".to_string(),
                )
            }
            ReportError::Scope(e) => (e.reason().to_string(), e.to_string()),
            ReportError::Execution(ExecutionError::Timeout(limit)) => (
                "execution-timeout".to_string(),
                format!("the report did not finish within {} seconds", limit.as_secs()),
            ),
            ReportError::Execution(e) => {
                tracing::error!(error = %e, "report execution failed");
                (
                    "execution-failed".to_string(),
                    "the report could not be executed".to_string(),
                )
            }
            ReportError::Busy => (
                "busy".to_string(),
                "too many reports are running; try again shortly".to_string(),
            ),
            ReportError::UnknownReport(e) => ("unknown-report".to_string(), e.0.clone()),
        };
        ErrorReport {
            ok: false,
            reason,
            detail,
        }
    }
}
