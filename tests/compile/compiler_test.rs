//! Integration tests for declarative report compilation.
//!
//! Configs are written as the JSON the report builder produces.

use quarry::compile::{CompileError, CompiledQuery, QueryCompiler};
use quarry::report::{ParamValue, Params, QueryConfig};
use quarry::schema::SchemaWhitelist;
use quarry::sql::lexer::parser_dialect;
use quarry::sql::Dialect;
use sqlparser::parser::Parser;

fn config(json: &str) -> QueryConfig {
    serde_json::from_str(json).unwrap()
}

fn params(json: &str) -> Params {
    serde_json::from_str(json).unwrap()
}

fn compile(config: &QueryConfig, params: &Params, dialect: Dialect) -> Result<CompiledQuery, CompileError> {
    let whitelist = SchemaWhitelist::builtin().unwrap();
    QueryCompiler::new(&whitelist, dialect).compile(config, params)
}

fn assert_parses(sql: &str, dialect: Dialect) {
    if let Err(e) = Parser::parse_sql(&*parser_dialect(dialect), sql) {
        panic!("Invalid SQL for {:?}: {}\nSQL: {}", dialect, e, sql);
    }
}

const ENROLMENTS: &str = r#"{
    "tables":  [{"table": "course"}, {"table": "enrolment"}],
    "columns": [{"table": "course", "column": "fullname"},
                {"table": "enrolment", "column": "id", "aggregate": "count", "alias": "enrolled"}],
    "joins":   [{"left": "course", "right": "enrolment", "type": "inner", "on": [["id", "course_id"]]}],
    "filters": [{"table": "enrolment", "column": "status", "operator": "=", "param": "status"}],
    "groupby": [{"table": "course", "column": "fullname"}],
    "orderby": [{"table": "course", "column": "fullname", "direction": "asc"}]
}"#;

// ============================================================================
// Output shape
// ============================================================================

#[test]
fn test_enrolments_per_course() {
    let compiled = compile(&config(ENROLMENTS), &params(r#"{"status": 0}"#), Dialect::Postgres).unwrap();

    insta::assert_snapshot!(compiled.sql(), @r"
    SELECT
      course.fullname,
      COUNT(enrolment.id) AS enrolled
    FROM course
    INNER JOIN enrolment ON course.id = enrolment.course_id
    WHERE enrolment.status = :status
    GROUP BY course.fullname
    ORDER BY course.fullname ASC
    ");
    assert_eq!(compiled.params["status"], ParamValue::Int(0));
    assert!(compiled.warnings.is_empty());
    assert_parses(&compiled.sql(), Dialect::Postgres);
}

#[test]
fn test_compilation_is_deterministic() {
    let config = config(ENROLMENTS);
    let params = params(r#"{"status": 1, "ignored": "x"}"#);
    let first = compile(&config, &params, Dialect::Postgres).unwrap();
    let second = compile(&config, &params, Dialect::Postgres).unwrap();
    assert_eq!(first.sql(), second.sql());
    assert_eq!(first.params, second.params);
    assert!(!first.params.contains_key("ignored"));
}

#[test]
fn test_count_and_page_queries_parse() {
    let compiled = compile(&config(ENROLMENTS), &params(r#"{"status": 0}"#), Dialect::Sqlite).unwrap();
    let count = compiled.count_sql();
    assert!(count.contains("COUNT(*) AS total"));
    assert!(!count.contains("ORDER BY"));
    assert_parses(&count, Dialect::Sqlite);

    let page = compiled.paged_sql(3, 20);
    assert!(page.ends_with("LIMIT 20 OFFSET 60"), "{}", page);
    assert_parses(&page, Dialect::Sqlite);
}

#[test]
fn test_tsql_rendering() {
    let compiled = compile(&config(ENROLMENTS), &params(r#"{"status": 0}"#), Dialect::TSql).unwrap();
    let sql = compiled.paged_sql(0, 10);
    assert!(sql.contains("WHERE enrolment.status = @status"), "{}", sql);
    assert!(sql.ends_with("OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"), "{}", sql);
}

#[test]
fn test_request_values_never_reach_sql() {
    let config = config(
        r#"{
        "tables":  [{"table": "user", "alias": "u"}],
        "columns": [{"table": "u", "column": "username"}],
        "filters": [{"table": "u", "column": "city", "operator": "like", "param": "city"}]
    }"#,
    );
    let compiled = compile(&config, &params(r#"{"city": "x' OR '1'='1"}"#), Dialect::Postgres).unwrap();
    let sql = compiled.sql();
    assert!(sql.contains("u.city LIKE :city"), "{}", sql);
    assert!(!sql.contains("'1'='1"));
    assert_eq!(compiled.params["city"], ParamValue::from("x' OR '1'='1"));
}

#[test]
fn test_three_way_join_with_range() {
    let config = config(
        r#"{
        "tables":  [{"table": "course", "alias": "c"}, {"table": "enrolment", "alias": "e"}, {"table": "user", "alias": "u"}],
        "columns": [{"table": "u", "column": "username"}, {"table": "c", "column": "shortname"}],
        "joins":   [{"left": "e", "right": "u", "on": [["user_id", "id"]]},
                    {"left": "c", "right": "e", "type": "left", "on": [["id", "course_id"]]}],
        "filters": [{"table": "e", "column": "timestart", "operator": ">=", "param": "from"},
                    {"table": "e", "column": "timestart", "operator": "<=", "param": "to"}]
    }"#,
    );
    let compiled = compile(&config, &params(r#"{"from": 10, "to": 20}"#), Dialect::Postgres).unwrap();
    let sql = compiled.sql();
    assert!(sql.contains("FROM course AS c\nLEFT JOIN enrolment AS e ON c.id = e.course_id"), "{}", sql);
    assert!(sql.contains("INNER JOIN \"user\" AS u ON e.user_id = u.id"), "{}", sql);
    assert!(sql.contains("e.timestart >= :timestart_from AND e.timestart <= :timestart_to"), "{}", sql);
    assert_parses(&sql, Dialect::Postgres);
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn test_unknown_keywords_rejected() {
    let mut bad = config(ENROLMENTS);
    bad.order_by[0].direction = Some("sideways".into());
    let err = compile(&bad, &params(r#"{"status": 0}"#), Dialect::Postgres).unwrap_err();
    assert_eq!(err.reason(), "unsupported-direction");

    let mut bad = config(ENROLMENTS);
    bad.joins[0].join_type = "cross".into();
    let err = compile(&bad, &params(r#"{"status": 0}"#), Dialect::Postgres).unwrap_err();
    assert_eq!(err.reason(), "unsupported-join-type");
}

#[test]
fn test_missing_parameter() {
    let err = compile(&config(ENROLMENTS), &Params::new(), Dialect::Postgres).unwrap_err();
    assert_eq!(err, CompileError::MissingParameter("status".into()));
}

#[test]
fn test_table_outside_whitelist() {
    let mut bad = config(ENROLMENTS);
    bad.tables[1].table = "sessions".into();
    let err = compile(&bad, &params(r#"{"status": 0}"#), Dialect::Postgres).unwrap_err();
    assert_eq!(err, CompileError::DisallowedTable("sessions".into()));
}
