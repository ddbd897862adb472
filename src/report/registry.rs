//! Report registry.
//!
//! Built-in reports are constructed from [`ReportKind`] at startup; custom
//! definitions are added by numeric id. A lookup miss is an immediate error.

use std::collections::BTreeMap;

use super::config::{ColumnRef, ColumnSpec, FilterSpec, JoinSpec, OrderSpec, QueryConfig, TableSpec};
use super::{ReportDefinition, ReportId, ReportKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report: {0}")]
pub struct UnknownReport(pub String);

#[derive(Debug, Clone, Default)]
pub struct ReportRegistry {
    reports: BTreeMap<ReportId, ReportDefinition>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in report.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in ReportKind::ALL {
            registry.insert(builtin(kind));
        }
        registry
    }

    /// Add or replace a definition under its own id.
    pub fn insert(&mut self, definition: ReportDefinition) {
        self.reports.insert(definition.id, definition);
    }

    pub fn get(&self, id: &ReportId) -> Result<&ReportDefinition, UnknownReport> {
        self.reports
            .get(id)
            .ok_or_else(|| UnknownReport(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ReportId> {
        self.reports.keys()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

/// Construct the definition of a built-in report.
pub fn builtin(kind: ReportKind) -> ReportDefinition {
    match kind {
        ReportKind::CourseEnrolments => course_enrolments(),
        ReportKind::InactiveUsers => inactive_users(),
        ReportKind::CourseCompletions => course_completions(),
        ReportKind::UnitMembers => unit_members(),
    }
}

// =============================================================================
// Built-in definitions
// =============================================================================

fn table(name: &str, alias: &str) -> TableSpec {
    TableSpec {
        table: name.into(),
        alias: Some(alias.into()),
    }
}

fn column(table: &str, column: &str, alias: &str) -> ColumnSpec {
    ColumnSpec {
        table: table.into(),
        column: column.into(),
        aggregate: None,
        alias: Some(alias.into()),
    }
}

fn inner_join(left: &str, right: &str, left_col: &str, right_col: &str) -> JoinSpec {
    JoinSpec {
        left: left.into(),
        right: right.into(),
        join_type: "inner".into(),
        on: vec![(left_col.into(), right_col.into())],
    }
}

fn order(table: &str, column: &str, direction: &str) -> OrderSpec {
    OrderSpec {
        table: table.into(),
        column: column.into(),
        direction: Some(direction.into()),
    }
}

fn course_enrolments() -> ReportDefinition {
    let config = QueryConfig {
        tables: vec![
            table("course", "c"),
            table("enrolment", "e"),
            table("user", "u"),
        ],
        columns: vec![
            column("c", "fullname", "course"),
            ColumnSpec {
                aggregate: Some("count".into()),
                ..column("e", "id", "enrolled")
            },
        ],
        joins: vec![
            inner_join("c", "e", "id", "course_id"),
            inner_join("e", "u", "user_id", "id"),
        ],
        filters: vec![
            FilterSpec {
                table: "e".into(),
                column: "status".into(),
                operator: "=".into(),
                param: "status".into(),
                logic: None,
            },
            FilterSpec {
                table: "u".into(),
                column: "deleted".into(),
                operator: "=".into(),
                param: "deleted".into(),
                logic: Some("and".into()),
            },
        ],
        group_by: vec![ColumnRef {
            table: "c".into(),
            column: "fullname".into(),
        }],
        order_by: vec![order("c", "fullname", "asc")],
    };
    ReportDefinition::declarative(ReportKind::CourseEnrolments, "Course enrolments", config)
        .with_default("status", 0i64)
        .with_default("deleted", 0i64)
}

fn inactive_users() -> ReportDefinition {
    ReportDefinition::raw_sql(
        ReportKind::InactiveUsers,
        "Inactive users",
        "SELECT u.id, u.username, u.firstname, u.lastname, u.lastaccess
           FROM {user} u
          WHERE u.deleted = 0
            AND u.suspended = 0
            AND u.lastaccess < :cutoff
       ORDER BY u.lastaccess ASC, u.id ASC",
    )
    .with_default("cutoff", 0i64)
    .with_ttl(300)
}

fn course_completions() -> ReportDefinition {
    ReportDefinition::raw_sql(
        ReportKind::CourseCompletions,
        "Course completions",
        "SELECT c.fullname AS course, COUNT(cc.id) AS completed
           FROM {completion} cc
           JOIN {course} c ON c.id = cc.course_id
           JOIN {user} u ON u.id = cc.user_id
          WHERE cc.timecompleted IS NOT NULL
       GROUP BY c.fullname
       ORDER BY c.fullname",
    )
}

fn unit_members() -> ReportDefinition {
    let config = QueryConfig {
        tables: vec![
            table("unit", "n"),
            table("membership", "m"),
            table("user", "u"),
        ],
        columns: vec![
            column("n", "name", "unit"),
            column("u", "username", "username"),
            column("u", "email", "email"),
            column("m", "role", "role"),
        ],
        joins: vec![
            inner_join("n", "m", "id", "unit_id"),
            inner_join("m", "u", "user_id", "id"),
        ],
        filters: Vec::new(),
        group_by: Vec::new(),
        order_by: vec![order("n", "name", "asc"), order("u", "username", "asc")],
    };
    ReportDefinition::declarative(ReportKind::UnitMembers, "Unit members", config)
}
