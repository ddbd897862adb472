//! Declarative report configuration.
//!
//! The JSON shape produced by the report builder UI:
//!
//! ```json
//! {
//!   "tables":  [{"table": "course", "alias": "c"}, {"table": "enrolment", "alias": "e"}],
//!   "columns": [{"table": "c", "column": "fullname"},
//!               {"table": "e", "column": "id", "aggregate": "count", "alias": "enrolled"}],
//!   "joins":   [{"left": "c", "right": "e", "type": "inner", "on": [["id", "course_id"]]}],
//!   "filters": [{"table": "e", "column": "status", "operator": "=", "param": "status"}],
//!   "groupby": [{"table": "c", "column": "fullname"}],
//!   "orderby": [{"table": "c", "column": "fullname", "direction": "asc"}]
//! }
//! ```
//!
//! Keyword fields (aggregate, operator, join type, logic, direction) stay raw
//! strings here; the compiler parses them into the closed enums below and
//! rejects anything else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sql::{JoinType, SortDir};

// =============================================================================
// Config model
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default, rename = "groupby")]
    pub group_by: Vec<ColumnRef>,
    #[serde(default, rename = "orderby")]
    pub order_by: Vec<OrderSpec>,
}

/// A table in the FROM list. The alias defaults to the table name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl TableSpec {
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// A column qualified by table alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// An output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ColumnSpec {
    pub fn column_ref(&self) -> ColumnRef {
        ColumnRef {
            table: self.table.clone(),
            column: self.column.clone(),
        }
    }
}

/// Equality join between two aliases; `on` pairs are `[left column, right column]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub left: String,
    pub right: String,
    #[serde(default = "default_join_type", rename = "type")]
    pub join_type: String,
    #[serde(default)]
    pub on: Vec<(String, String)>,
}

fn default_join_type() -> String {
    "inner".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub table: String,
    pub column: String,
    pub operator: String,
    /// Name of the request parameter holding the value.
    pub param: String,
    /// How this filter combines with the previous one; ignored on the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

// =============================================================================
// Closed keyword sets
// =============================================================================

/// A keyword outside one of the closed sets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported {kind}: '{value}'")]
pub struct UnsupportedKeyword {
    pub kind: &'static str,
    pub value: String,
}

impl UnsupportedKeyword {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }
}

impl FromStr for Aggregate {
    type Err = UnsupportedKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Aggregate::Count),
            "sum" => Ok(Aggregate::Sum),
            "avg" => Ok(Aggregate::Avg),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            _ => Err(UnsupportedKeyword::new("aggregate", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    In,
}

impl FilterOperator {
    /// Suffix that keeps range bounds on one column apart (`_from` / `_to`).
    pub fn bound_suffix(&self) -> Option<&'static str> {
        match self {
            FilterOperator::Gt | FilterOperator::Gte => Some("_from"),
            FilterOperator::Lt | FilterOperator::Lte => Some("_to"),
            _ => None,
        }
    }
}

impl FromStr for FilterOperator {
    type Err = UnsupportedKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "=" => Ok(FilterOperator::Eq),
            "!=" | "<>" => Ok(FilterOperator::Ne),
            "<" => Ok(FilterOperator::Lt),
            "<=" => Ok(FilterOperator::Lte),
            ">" => Ok(FilterOperator::Gt),
            ">=" => Ok(FilterOperator::Gte),
            "LIKE" => Ok(FilterOperator::Like),
            "IN" => Ok(FilterOperator::In),
            _ => Err(UnsupportedKeyword::new("operator", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl FromStr for Logic {
    type Err = UnsupportedKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "AND" => Ok(Logic::And),
            "OR" => Ok(Logic::Or),
            _ => Err(UnsupportedKeyword::new("logic", s)),
        }
    }
}

/// Parse a sort direction; an empty string means ascending.
pub fn parse_direction(s: &str) -> Result<SortDir, UnsupportedKeyword> {
    match s.trim().to_ascii_uppercase().as_str() {
        "" | "ASC" => Ok(SortDir::Asc),
        "DESC" => Ok(SortDir::Desc),
        _ => Err(UnsupportedKeyword::new("direction", s)),
    }
}

/// Parse a join type (`inner` or `left`).
pub fn parse_join_type(s: &str) -> Result<JoinType, UnsupportedKeyword> {
    match s.trim().to_ascii_uppercase().as_str() {
        "INNER" => Ok(JoinType::Inner),
        "LEFT" => Ok(JoinType::Left),
        _ => Err(UnsupportedKeyword::new("join type", s)),
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}
