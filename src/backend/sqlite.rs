//! SQLite storage backend.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;

use super::{BackendError, BackendResult, QueryBackend, RowSet};
use crate::report::ParamValue;

/// SQLite backend; statements run on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> BackendResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> BackendResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a batch of statements (schema setup, fixtures).
    pub fn execute_batch(&self, sql: &str) -> BackendResult<()> {
        let conn = self.conn.lock().map_err(|_| BackendError::Poisoned)?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

#[async_trait]
impl QueryBackend for SqliteBackend {
    async fn query(
        &self,
        sql: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> BackendResult<RowSet> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.clone();
        tokio::task::spawn_blocking(move || run_query(&conn, &sql, &params))
            .await
            .map_err(|e| BackendError::Task(e.to_string()))?
    }
}

fn run_query(
    conn: &Mutex<Connection>,
    sql: &str,
    params: &BTreeMap<String, ParamValue>,
) -> BackendResult<RowSet> {
    let conn = conn.lock().map_err(|_| BackendError::Poisoned)?;
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    for index in 1..=stmt.parameter_count() {
        let name = stmt
            .parameter_name(index)
            .map(|n| n.trim_start_matches([':', '@', '$']).to_string())
            .ok_or_else(|| BackendError::MissingParameter(format!("?{}", index)))?;
        let value = params
            .get(&name)
            .ok_or_else(|| BackendError::MissingParameter(name.clone()))?;
        stmt.raw_bind_parameter(index, to_sql_value(&name, value)?)?;
    }

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(to_json))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(values);
    }

    Ok(RowSet {
        columns,
        rows: out,
    })
}

fn to_sql_value(name: &str, value: &ParamValue) -> BackendResult<Value> {
    Ok(match value {
        ParamValue::Null => Value::Null,
        ParamValue::Bool(b) => Value::Integer(i64::from(*b)),
        ParamValue::Int(n) => Value::Integer(*n),
        ParamValue::Float(f) => Value::Real(*f),
        ParamValue::Text(s) => Value::Text(s.clone()),
        ParamValue::List(_) => return Err(BackendError::UnsupportedValue(name.to_string())),
    })
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(n) => n.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
        ValueRef::Blob(bytes) => serde_json::Value::Array(bytes.iter().map(|b| (*b).into()).collect()),
    }
}
