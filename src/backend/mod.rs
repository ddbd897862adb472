//! Storage backends that run report SQL.
//!
//! The pipeline only ever hands a backend fully rendered SQL plus named
//! parameter values; binding is the backend's job.

mod sqlite;

pub use sqlite::SqliteBackend;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::report::ParamValue;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no value bound for parameter '{0}'")]
    MissingParameter(String),

    #[error("parameter '{0}' cannot be bound as a scalar")]
    UnsupportedValue(String),

    #[error("backend task failed: {0}")]
    Task(String),

    #[error("connection lock poisoned")]
    Poisoned,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Query result rows with their column labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row as an integer (COUNT results).
    pub fn scalar_u64(&self) -> Option<u64> {
        let value = self.rows.first()?.first()?;
        value
            .as_u64()
            .or_else(|| value.as_i64().and_then(|n| u64::try_from(n).ok()))
    }
}

/// Runs SQL against the reporting store.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run `sql`, binding each `:name` / `@name` placeholder from `params`.
    async fn query(&self, sql: &str, params: &BTreeMap<String, ParamValue>)
        -> BackendResult<RowSet>;
}
