//! Integration tests for the schema whitelist.

use quarry::schema::{SchemaError, SchemaWhitelist};

#[test]
fn test_builtin_covers_report_tables() {
    let whitelist = SchemaWhitelist::builtin().unwrap();
    for table in ["user", "course", "enrolment", "completion", "unit", "membership"] {
        assert!(whitelist.is_table_allowed(table), "{} should be allowed", table);
    }
    assert!(whitelist.is_column_allowed("user", "lastaccess"));
    assert!(!whitelist.is_column_allowed("user", "password"));
}

#[test]
fn test_load_from_toml() {
    let whitelist = SchemaWhitelist::from_toml_str(
        r#"
        [tables.Course]
        label = "Courses"
        columns = ["id", "FullName"]

        [tables.enrolment]
        columns = ["id", "course_id"]
        "#,
    )
    .unwrap();

    assert_eq!(whitelist.allowed_tables(), vec!["course", "enrolment"]);
    assert!(whitelist.is_column_allowed("COURSE", "fullname"));
    assert_eq!(
        whitelist.table("course").and_then(|t| t.label.as_deref()),
        Some("Courses")
    );
    assert!(!whitelist.is_table_allowed("user"));
}

#[test]
fn test_empty_column_list_rejected() {
    let err = SchemaWhitelist::from_toml_str(
        r#"
        [tables.course]
        columns = []
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::EmptyTable(name) if name == "course"));
}

#[test]
fn test_quoted_names_rejected() {
    let err = SchemaWhitelist::from_toml_str(
        r#"
        [tables."course details"]
        columns = ["id"]
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidIdentifier(_)));
}

#[test]
fn test_empty_whitelist_allows_nothing() {
    let whitelist = SchemaWhitelist::new();
    assert!(whitelist.is_empty());
    assert!(!whitelist.is_table_allowed("user"));
    assert!(!whitelist.is_column_allowed("user", "id"));
}
