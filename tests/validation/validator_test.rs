//! Integration tests for raw report SQL validation.

use quarry::schema::SchemaWhitelist;
use quarry::sql::Dialect;
use quarry::validation::{SqlValidator, ValidationError};

fn validate(sql: &str) -> Result<(), ValidationError> {
    let whitelist = SchemaWhitelist::builtin().unwrap();
    SqlValidator::new(&whitelist, Dialect::Postgres)
        .validate(sql)
        .map(|_| ())
}

// ============================================================================
// Accepted statements
// ============================================================================

#[test]
fn test_report_with_joins_and_subquery() {
    let sql = r#"
        SELECT c.fullname, COUNT(e.id) AS enrolled
          FROM {course} c
          JOIN {enrolment} e ON e.course_id = c.id
         WHERE c.visible = 1
           AND e.user_id IN (SELECT m.user_id FROM {membership} m WHERE m.unit_id = :unit)
      GROUP BY c.fullname
      ORDER BY c.fullname
    "#;
    assert_eq!(validate(sql), Ok(()));
}

#[test]
fn test_identifiers_containing_blocked_words() {
    let sql = "SELECT u.timemodified AS updated_at, u.id AS update_log, u.city AS created_by FROM {user} u";
    assert_eq!(validate(sql), Ok(()));
}

#[test]
fn test_blocked_words_in_comments_and_strings() {
    let sql = "SELECT u.id -- DROP everything\nFROM {user} u WHERE u.auth = 'TRUNCATE'";
    assert_eq!(validate(sql), Ok(()));
}

#[test]
fn test_trailing_semicolon_and_whitespace() {
    assert_eq!(validate("SELECT u.id FROM {user} u;\n\n  "), Ok(()));
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn test_stacked_statement() {
    assert_eq!(
        validate("SELECT u.id FROM {user} u; DROP TABLE {user}"),
        Err(ValidationError::MultipleStatements)
    );
}

#[test]
fn test_comment_after_semicolon_is_a_second_statement() {
    assert_eq!(
        validate("SELECT u.id FROM {user} u; -- done"),
        Err(ValidationError::MultipleStatements)
    );
}

#[test]
fn test_non_select_statements() {
    for sql in [
        "UPDATE {user} SET deleted = 1",
        "DELETE FROM {user}",
        "EXPLAIN SELECT 1",
        "(SELECT u.id FROM {user} u)",
        "   ",
    ] {
        assert_eq!(validate(sql), Err(ValidationError::NotASelect), "{}", sql);
    }
}

#[test]
fn test_blocked_keyword_reports_word() {
    let err = validate("SELECT u.id FROM {user} u WHERE u.id = 1 OR exec").unwrap_err();
    assert_eq!(err, ValidationError::BlockedKeyword("EXEC".into()));
    assert_eq!(err.to_string(), "blocked-keyword:EXEC");
    assert_eq!(err.reason(), "blocked-keyword");
}

#[test]
fn test_table_outside_whitelist_in_join() {
    let err = validate("SELECT u.id FROM {user} u LEFT JOIN {sessions} s ON s.user_id = u.id")
        .unwrap_err();
    assert_eq!(err, ValidationError::DisallowedTable("sessions".into()));
}

#[test]
fn test_nested_derived_table_is_checked() {
    let err = validate(
        "SELECT t.n FROM (SELECT COUNT(*) AS n FROM (SELECT p.id FROM passwords p) x) t",
    )
    .unwrap_err();
    assert_eq!(err, ValidationError::DisallowedTable("passwords".into()));
}

#[test]
fn test_parenthesized_table_outside_whitelist() {
    assert_eq!(
        validate("SELECT * FROM (config)").unwrap_err(),
        ValidationError::DisallowedTable("config".into())
    );
    assert_eq!(
        validate("SELECT u.id, s.value FROM {user} u JOIN (config) s ON 1 = 1").unwrap_err(),
        ValidationError::DisallowedTable("config".into())
    );
    assert_eq!(
        validate("SELECT * FROM ((config))").unwrap_err(),
        ValidationError::DisallowedTable("config".into())
    );
}

#[test]
fn test_bracketed_table_name_is_rejected() {
    assert_eq!(
        validate("SELECT s.value FROM {user} u JOIN [config] s ON 1 = 1").unwrap_err(),
        ValidationError::DisallowedTable("[config]".into())
    );

    let whitelist = SchemaWhitelist::builtin().unwrap();
    for dialect in [Dialect::Sqlite, Dialect::TSql] {
        let err = SqlValidator::new(&whitelist, dialect)
            .validate("SELECT s.value FROM {user} u JOIN [config] s ON 1 = 1")
            .unwrap_err();
        assert_eq!(err, ValidationError::DisallowedTable("config".into()), "{:?}", dialect);
    }
}

#[test]
fn test_table_function_is_rejected() {
    let err = validate("SELECT name FROM pragma_table_info('config')").unwrap_err();
    assert_eq!(err.reason(), "disallowed-table");
}

#[test]
fn test_tsql_placeholders() {
    let whitelist = SchemaWhitelist::builtin().unwrap();
    let statement = SqlValidator::new(&whitelist, Dialect::TSql)
        .validate("SELECT u.id FROM {user} u WHERE u.lastaccess < :cutoff")
        .unwrap();
    assert!(statement.render("").contains("@cutoff"));
}
