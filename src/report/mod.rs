//! Report definitions.
//!
//! A report is either author-written SQL or a declarative [`QueryConfig`],
//! plus default parameters and caching policy. Definitions are read-only
//! inputs to execution.

pub mod config;
pub mod params;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use config::{
    Aggregate, ColumnRef, ColumnSpec, FilterOperator, FilterSpec, JoinSpec, Logic, OrderSpec,
    QueryConfig, TableSpec, UnsupportedKeyword,
};
pub use params::{merge_params, ParamValue, Params};
pub use registry::{ReportRegistry, UnknownReport};

// =============================================================================
// Identity
// =============================================================================

/// Built-in report types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    CourseEnrolments,
    InactiveUsers,
    CourseCompletions,
    UnitMembers,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::CourseEnrolments,
        ReportKind::InactiveUsers,
        ReportKind::CourseCompletions,
        ReportKind::UnitMembers,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::CourseEnrolments => "course_enrolments",
            ReportKind::InactiveUsers => "inactive_users",
            ReportKind::CourseCompletions => "course_completions",
            ReportKind::UnitMembers => "unit_members",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::CourseEnrolments => "Enrolments per course",
            ReportKind::InactiveUsers => "Users inactive since a cutoff",
            ReportKind::CourseCompletions => "Completions per course",
            ReportKind::UnitMembers => "Members of each organisational unit",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportKind {
    type Err = UnknownReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownReport(s.to_string()))
    }
}

/// Stable report identity: a built-in kind or a custom numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportId {
    Builtin(ReportKind),
    Custom(u64),
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportId::Builtin(kind) => write!(f, "{}", kind),
            ReportId::Custom(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ReportId {
    type Err = UnknownReport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u64>() {
            Ok(id) => Ok(ReportId::Custom(id)),
            Err(_) => s.parse().map(ReportId::Builtin),
        }
    }
}

impl From<ReportKind> for ReportId {
    fn from(kind: ReportKind) -> Self {
        ReportId::Builtin(kind)
    }
}

// =============================================================================
// Definition
// =============================================================================

/// The query behind a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReportQuery {
    RawSql { sql: String },
    Declarative { config: QueryConfig },
}

impl ReportQuery {
    pub fn mode(&self) -> &'static str {
        match self {
            ReportQuery::RawSql { .. } => "raw_sql",
            ReportQuery::Declarative { .. } => "declarative",
        }
    }
}

fn default_cacheable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub id: ReportId,
    pub name: String,
    #[serde(flatten)]
    pub query: ReportQuery,
    #[serde(default)]
    pub default_params: Params,
    /// Seconds; `None` uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

impl ReportDefinition {
    pub fn raw_sql(id: impl Into<ReportId>, name: &str, sql: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            query: ReportQuery::RawSql {
                sql: sql.to_string(),
            },
            default_params: Params::new(),
            cache_ttl: None,
            cacheable: true,
        }
    }

    pub fn declarative(id: impl Into<ReportId>, name: &str, config: QueryConfig) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            query: ReportQuery::Declarative { config },
            default_params: Params::new(),
            cache_ttl: None,
            cacheable: true,
        }
    }

    pub fn with_default(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.default_params.insert(name.to_string(), value.into());
        self
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.cache_ttl = Some(seconds);
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
}
