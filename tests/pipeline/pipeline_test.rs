//! End-to-end execution tests against an in-memory SQLite fixture.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use quarry::backend::{BackendResult, QueryBackend, RowSet, SqliteBackend};
use quarry::cache::ResultCache;
use quarry::config::Settings;
use quarry::error::{ExecutionError, ReportError};
use quarry::report::{ParamValue, Params, ReportDefinition, ReportId, ReportKind};
use quarry::schema::SchemaWhitelist;
use quarry::sql::Dialect;
use quarry::tenant::{Caller, StaticMembership};
use quarry::validation::ValidationError;
use quarry::ReportExecutor;

const ADMIN: u64 = 1;
const MANAGER: u64 = 7;
const NOBODY: u64 = 8;

const FIXTURE: &str = "
CREATE TABLE user (
    id INTEGER PRIMARY KEY, username TEXT, firstname TEXT, lastname TEXT, email TEXT,
    suspended INTEGER, deleted INTEGER, lastaccess INTEGER
);
CREATE TABLE course (id INTEGER PRIMARY KEY, fullname TEXT, shortname TEXT, visible INTEGER);
CREATE TABLE enrolment (id INTEGER PRIMARY KEY, user_id INTEGER, course_id INTEGER, status INTEGER);
CREATE TABLE completion (id INTEGER PRIMARY KEY, user_id INTEGER, course_id INTEGER, timecompleted INTEGER);
CREATE TABLE unit (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE membership (id INTEGER PRIMARY KEY, user_id INTEGER, unit_id INTEGER, role TEXT);

INSERT INTO user VALUES
    (10, 'ana', 'Ana', 'Silva', 'ana@example.org', 0, 0, 100),
    (11, 'ben', 'Ben', 'Ng', 'ben@example.org', 0, 0, 200),
    (12, 'cai', 'Cai', 'Wu', 'cai@example.org', 0, 0, 300),
    (13, 'dee', 'Dee', 'Roy', 'dee@example.org', 1, 0, 50),
    (14, 'eli', 'Eli', 'Fox', 'eli@example.org', 0, 1, 60),
    (15, 'fay', 'Fay', 'Kim', 'fay@example.org', 0, 0, 400);

INSERT INTO course VALUES (1, 'Algebra', 'ALG', 1), (2, 'Biology', 'BIO', 1);
INSERT INTO enrolment (user_id, course_id, status) VALUES
    (10, 1, 0), (11, 1, 0), (12, 1, 1), (12, 2, 0), (15, 2, 0);
INSERT INTO completion (user_id, course_id, timecompleted) VALUES (10, 1, 500), (12, 2, NULL);

INSERT INTO unit VALUES (5, 'North'), (9, 'South');
INSERT INTO membership (user_id, unit_id, role) VALUES
    (10, 5, 'student'), (11, 5, 'student'), (12, 9, 'student'), (15, 9, 'student');
";

fn sqlite_settings() -> Settings {
    let mut settings = Settings::default();
    settings.database.dialect = Dialect::Sqlite;
    settings
}

fn memberships() -> StaticMembership {
    StaticMembership::new()
        .with_site_admin(ADMIN)
        .with_member(MANAGER, 5)
}

fn fixture_executor(settings: Settings) -> ReportExecutor {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.execute_batch(FIXTURE).unwrap();
    ReportExecutor::new(
        settings,
        SchemaWhitelist::builtin().unwrap(),
        Arc::new(backend),
        Arc::new(memberships()),
    )
}

fn cutoff(value: i64) -> Params {
    [("cutoff".to_string(), ParamValue::Int(value))].into()
}

fn usernames(rows: &[Vec<serde_json::Value>]) -> Vec<String> {
    rows.iter()
        .map(|row| row[1].as_str().unwrap_or_default().to_string())
        .collect()
}

// ============================================================================
// Results and paging
// ============================================================================

#[tokio::test]
async fn test_raw_report_for_site_admin() {
    let executor = fixture_executor(sqlite_settings());
    let envelope = executor
        .execute_report(
            &ReportKind::InactiveUsers.into(),
            &cutoff(350),
            Caller::new(ADMIN),
            0,
            0,
        )
        .await
        .unwrap();

    assert_eq!(
        envelope.columns,
        vec!["id", "username", "firstname", "lastname", "lastaccess"]
    );
    assert_eq!(usernames(&envelope.rows), vec!["ana", "ben", "cai"]);
    assert_eq!(envelope.total, 3);
    assert_eq!(envelope.page, 0);
    assert_eq!(envelope.page_size, 50);
    assert!(!envelope.cached);
}

#[tokio::test]
async fn test_paging_reports_full_total() {
    let executor = fixture_executor(sqlite_settings());
    let id = ReportId::from(ReportKind::InactiveUsers);

    let first = executor
        .execute_report(&id, &cutoff(1_000), Caller::new(ADMIN), 0, 2)
        .await
        .unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(usernames(&first.rows), vec!["ana", "ben"]);

    let last = executor
        .execute_report(&id, &cutoff(1_000), Caller::new(ADMIN), 1, 2)
        .await
        .unwrap();
    assert_eq!(last.total, 4);
    assert_eq!(usernames(&last.rows), vec!["cai", "fay"]);

    let past_end = executor
        .execute_report(&id, &cutoff(1_000), Caller::new(ADMIN), 5, 2)
        .await
        .unwrap();
    assert!(past_end.rows.is_empty());
    assert_eq!(past_end.total, 4);
}

#[tokio::test]
async fn test_declarative_report_with_defaults() {
    let executor = fixture_executor(sqlite_settings());
    let envelope = executor
        .execute_report(
            &ReportKind::CourseEnrolments.into(),
            &Params::new(),
            Caller::new(ADMIN),
            0,
            10,
        )
        .await
        .unwrap();

    assert_eq!(envelope.columns, vec!["course", "enrolled"]);
    assert_eq!(
        envelope.rows,
        vec![vec![json!("Algebra"), json!(2)], vec![json!("Biology"), json!(2)]]
    );
    assert_eq!(envelope.total, 2);
}

// ============================================================================
// Tenant scoping
// ============================================================================

#[tokio::test]
async fn test_member_sees_only_their_unit() {
    let executor = fixture_executor(sqlite_settings());
    let envelope = executor
        .execute_report(
            &ReportKind::InactiveUsers.into(),
            &cutoff(1_000),
            Caller::new(MANAGER),
            0,
            0,
        )
        .await
        .unwrap();
    assert_eq!(usernames(&envelope.rows), vec!["ana", "ben"]);
    assert_eq!(envelope.total, 2);
}

#[tokio::test]
async fn test_empty_scope_returns_no_rows() {
    let executor = fixture_executor(sqlite_settings());
    for caller in [Caller::new(NOBODY), Caller::new(MANAGER).with_unit(9)] {
        let envelope = executor
            .execute_report(
                &ReportKind::CourseEnrolments.into(),
                &Params::new(),
                caller,
                0,
                0,
            )
            .await
            .unwrap();
        assert!(envelope.rows.is_empty());
        assert_eq!(envelope.total, 0);
    }
}

#[tokio::test]
async fn test_scoping_disabled() {
    let mut settings = sqlite_settings();
    settings.tenant.enabled = false;
    let executor = fixture_executor(settings);
    let envelope = executor
        .execute_report(
            &ReportKind::InactiveUsers.into(),
            &cutoff(1_000),
            Caller::new(NOBODY),
            0,
            0,
        )
        .await
        .unwrap();
    assert_eq!(envelope.total, 4);
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_second_call_is_cached() {
    let executor = fixture_executor(sqlite_settings()).with_cache(ResultCache::memory());
    let id = ReportId::from(ReportKind::InactiveUsers);

    let first = executor
        .execute_report(&id, &cutoff(350), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap();
    let second = executor
        .execute_report(&id, &cutoff(350), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.total, second.total);
}

#[tokio::test]
async fn test_cache_is_partitioned_by_scope() {
    let executor = fixture_executor(sqlite_settings()).with_cache(ResultCache::memory());
    let id = ReportId::from(ReportKind::InactiveUsers);

    let admin = executor
        .execute_report(&id, &cutoff(1_000), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap();
    let member = executor
        .execute_report(&id, &cutoff(1_000), Caller::new(MANAGER), 0, 0)
        .await
        .unwrap();

    assert!(!member.cached);
    assert_eq!(admin.total, 4);
    assert_eq!(member.total, 2);
}

#[tokio::test]
async fn test_list_and_joined_text_are_cached_apart() {
    let executor = fixture_executor(sqlite_settings()).with_cache(ResultCache::memory());
    let config = serde_json::from_str(
        r#"{
            "tables":  [{"table": "user", "alias": "u"}],
            "columns": [{"table": "u", "column": "id"}, {"table": "u", "column": "username"}],
            "filters": [{"table": "u", "column": "username", "operator": "in", "param": "names"}],
            "orderby": [{"table": "u", "column": "id"}]
        }"#,
    )
    .unwrap();
    let definition = ReportDefinition::declarative(ReportId::Custom(44), "Named users", config);
    let names = |value: ParamValue| -> Params { [("names".to_string(), value)].into() };

    let listed = executor
        .execute(&definition, &names(ParamValue::from(vec!["ana", "ben"])), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap();
    assert!(!listed.cached);
    assert_eq!(usernames(&listed.rows), vec!["ana", "ben"]);

    let joined = executor
        .execute(&definition, &names(ParamValue::from("ana,ben")), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap();
    assert!(!joined.cached);
    assert!(joined.rows.is_empty());
}

#[tokio::test]
async fn test_uncacheable_definition_always_executes() {
    let executor = fixture_executor(sqlite_settings()).with_cache(ResultCache::memory());
    let definition =
        ReportDefinition::raw_sql(ReportId::Custom(40), "Courses", "SELECT c.id FROM {course} c")
            .uncached();
    for _ in 0..2 {
        let envelope = executor
            .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
            .await
            .unwrap();
        assert!(!envelope.cached);
    }
    assert_eq!(executor.cache().unwrap().stats().unwrap().entries, 0);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_validation_error_is_a_definition_error() {
    let executor = fixture_executor(sqlite_settings());
    let definition = ReportDefinition::raw_sql(ReportId::Custom(41), "Bad", "SELECT * FROM {config}");
    let err = executor
        .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReportError::Validation(ValidationError::DisallowedTable(ref t)) if t == "config"
    ));
    assert!(err.is_definition_error());
    assert_eq!(err.to_report().reason, "disallowed-table:config");
}

#[tokio::test]
async fn test_parenthesized_or_bracketed_table_never_runs() {
    let executor = fixture_executor(sqlite_settings());
    for sql in [
        "SELECT * FROM (config)",
        "SELECT s.value FROM {user} u JOIN (config) s ON 1 = 1",
        "SELECT s.value FROM {user} u JOIN [config] s ON 1 = 1",
    ] {
        let definition = ReportDefinition::raw_sql(ReportId::Custom(45), "Sneaky", sql);
        let err = executor
            .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
            .await
            .unwrap_err();
        assert_eq!(err.to_report().reason, "disallowed-table:config", "{}", sql);
    }
}

#[tokio::test]
async fn test_store_failure_is_an_execution_error() {
    let executor = fixture_executor(sqlite_settings());
    let definition = ReportDefinition::raw_sql(
        ReportId::Custom(42),
        "Grades",
        "SELECT g.finalgrade FROM {grade} g",
    );
    let err = executor
        .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::Execution(ExecutionError::Backend(_))));
    assert!(!err.is_definition_error());
    let report = err.to_report();
    assert_eq!(report.reason, "execution-failed");
    assert!(!report.detail.contains("grade"));
}

#[tokio::test]
async fn test_missing_parameter_for_raw_sql() {
    let executor = fixture_executor(sqlite_settings());
    let definition = ReportDefinition::raw_sql(
        ReportId::Custom(43),
        "Since",
        "SELECT u.id FROM {user} u WHERE u.lastaccess > :since",
    );
    let err = executor
        .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();
    assert_eq!(err.to_report().reason, "missing-parameter");
}

#[tokio::test]
async fn test_unknown_report() {
    let executor = fixture_executor(sqlite_settings());
    let err = executor
        .execute_report(&ReportId::Custom(99), &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();
    assert_eq!(err.to_report().reason, "unknown-report");
}

// ============================================================================
// Admission and timeouts
// ============================================================================

/// Returns one row after a fixed delay.
struct SlowBackend {
    delay: Duration,
}

#[async_trait]
impl QueryBackend for SlowBackend {
    async fn query(
        &self,
        _sql: &str,
        _params: &BTreeMap<String, ParamValue>,
    ) -> BackendResult<RowSet> {
        tokio::time::sleep(self.delay).await;
        Ok(RowSet {
            columns: vec!["total".into()],
            rows: vec![vec![json!(1)]],
        })
    }
}

fn slow_executor(settings: Settings, delay: Duration) -> ReportExecutor {
    ReportExecutor::new(
        settings,
        SchemaWhitelist::builtin().unwrap(),
        Arc::new(SlowBackend { delay }),
        Arc::new(memberships()),
    )
}

fn course_ids() -> ReportDefinition {
    ReportDefinition::raw_sql(ReportId::Custom(50), "Courses", "SELECT c.id FROM {course} c")
}

#[tokio::test]
async fn test_busy_when_gate_is_full() {
    let mut settings = sqlite_settings();
    settings.execution.max_concurrent = Some(1);
    let executor = Arc::new(slow_executor(settings, Duration::from_millis(300)));

    let running = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            executor
                .execute(&course_ids(), &Params::new(), Caller::new(ADMIN), 0, 0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = executor
        .execute(&course_ids(), &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Busy));
    assert!(err.is_retryable());

    assert!(running.await.unwrap().is_ok());
    assert!(executor
        .execute(&course_ids(), &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_query_timeout() {
    let mut settings = sqlite_settings();
    settings.database.query_timeout_secs = 1;
    let executor = slow_executor(settings, Duration::from_secs(3));

    let err = executor
        .execute(&course_ids(), &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Execution(ExecutionError::Timeout(_))));
    assert_eq!(err.to_report().reason, "execution-timeout");
}

// ============================================================================
// Whitelist reload
// ============================================================================

#[tokio::test]
async fn test_reloaded_whitelist_applies_to_new_executions() {
    let executor = fixture_executor(sqlite_settings());
    let definition =
        ReportDefinition::raw_sql(ReportId::Custom(60), "Units", "SELECT n.name FROM {unit} n");
    assert!(executor
        .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .is_ok());

    executor.reload_whitelist(SchemaWhitelist::new().with_table("course", &["id"]).unwrap());
    let err = executor
        .execute(&definition, &Params::new(), Caller::new(ADMIN), 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Validation(ValidationError::DisallowedTable(_))));
}
