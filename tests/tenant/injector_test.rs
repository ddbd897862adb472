//! Integration tests for tenant scoping: scope resolution, predicate
//! injection into both query forms, and membership lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use quarry::backend::{QueryBackend, SqliteBackend};
use quarry::compile::QueryCompiler;
use quarry::config::TenantSettings;
use quarry::report::{ParamValue, Params, QueryConfig};
use quarry::schema::SchemaWhitelist;
use quarry::sql::Dialect;
use quarry::sql::RawStatement;
use quarry::tenant::{
    Access, BackendMembership, Caller, MembershipResolver, Restriction, ScopeError, TenantInjector,
    TenantScope,
};

fn member_of(units: &[u64]) -> Access {
    Access {
        site_wide: false,
        units: units.iter().copied().collect(),
    }
}

fn scoped_raw(sql: &str, scope: &TenantScope) -> (String, BTreeMap<String, ParamValue>) {
    let settings = TenantSettings::default();
    let injector = TenantInjector::new(&settings, "");
    let mut statement = RawStatement::parse(sql, Dialect::Postgres).unwrap();
    let mut params = BTreeMap::new();
    injector.inject_raw(scope, &mut statement, &mut params).unwrap();
    (statement.render(""), params)
}

// ============================================================================
// Scope selection
// ============================================================================

#[test]
fn test_implicit_scope_covers_all_units() {
    let scope = TenantScope::resolve(Caller::new(7), &member_of(&[9, 5]), true);
    let (sql, params) = scoped_raw("SELECT u.id FROM {user} u", &scope);
    assert_eq!(
        sql,
        "SELECT u.id FROM \"user\" u\nWHERE u.id IN (SELECT scope_m.user_id FROM membership AS scope_m WHERE scope_m.unit_id IN (:scope_unit_0, :scope_unit_1))"
    );
    assert_eq!(params.len(), 2);
    assert_eq!(params["scope_unit_0"], ParamValue::from(5u64));
    assert_eq!(params["scope_unit_1"], ParamValue::from(9u64));
}

#[test]
fn test_explicit_unit_narrows_scope() {
    let scope = TenantScope::resolve(Caller::new(7).with_unit(5), &member_of(&[5, 9]), true);
    let (sql, params) = scoped_raw("SELECT u.id FROM {user} u", &scope);
    assert!(sql.ends_with("IN (:scope_unit_0))"), "{}", sql);
    assert_eq!(params.len(), 1);
    assert_eq!(params["scope_unit_0"], ParamValue::from(5u64));
}

#[test]
fn test_scope_fingerprints_differ() {
    let all = TenantScope::resolve(Caller::new(7), &member_of(&[5, 9]), true);
    let one = TenantScope::resolve(Caller::new(7).with_unit(5), &member_of(&[5, 9]), true);
    assert_ne!(all.fingerprint(), one.fingerprint());
}

#[test]
fn test_disabled_scoping_is_unrestricted() {
    let scope = TenantScope::resolve(Caller::new(7).with_unit(5), &member_of(&[]), false);
    assert!(scope.is_unrestricted());
    let (sql, params) = scoped_raw("SELECT u.id FROM {user} u", &scope);
    assert_eq!(sql, "SELECT u.id FROM \"user\" u");
    assert!(params.is_empty());
}

#[test]
fn test_no_memberships_sees_nothing() {
    let scope = TenantScope::resolve(Caller::new(7), &member_of(&[]), true);
    assert_eq!(scope.restriction, Restriction::Units(BTreeSet::new()));
    let (sql, _) = scoped_raw("SELECT u.id FROM {user} u ORDER BY u.id", &scope);
    assert_eq!(sql, "SELECT u.id FROM \"user\" u WHERE 1 = 0 ORDER BY u.id");
}

// ============================================================================
// Injection
// ============================================================================

#[test]
fn test_or_filters_stay_grouped_under_scope() {
    let config: QueryConfig = serde_json::from_str(
        r#"{
        "tables":  [{"table": "user", "alias": "u"}],
        "columns": [{"table": "u", "column": "username"}],
        "filters": [{"table": "u", "column": "city", "operator": "=", "param": "city"},
                    {"table": "u", "column": "country", "operator": "=", "param": "country", "logic": "or"}]
    }"#,
    )
    .unwrap();
    let params: Params = serde_json::from_str(r#"{"city": "Perth", "country": "NZ"}"#).unwrap();

    let whitelist = SchemaWhitelist::builtin().unwrap();
    let mut compiled = QueryCompiler::new(&whitelist, Dialect::Postgres)
        .compile(&config, &params)
        .unwrap();

    let settings = TenantSettings::default();
    let scope = TenantScope::units(Caller::new(1), [3]);
    TenantInjector::new(&settings, "")
        .inject_query(&scope, &mut compiled)
        .unwrap();

    let sql = compiled.sql();
    assert!(
        sql.contains("WHERE (u.city = :city OR u.country = :country) AND u.id IN (SELECT"),
        "{}",
        sql
    );
    assert_eq!(
        compiled.params.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["city", "country", "scope_unit_0"]
    );
}

#[test]
fn test_compiled_query_without_user_alias_fails_closed() {
    let config: QueryConfig = serde_json::from_str(
        r#"{"tables": [{"table": "course", "alias": "c"}], "columns": [{"table": "c", "column": "id"}]}"#,
    )
    .unwrap();
    let whitelist = SchemaWhitelist::builtin().unwrap();
    let mut compiled = QueryCompiler::new(&whitelist, Dialect::Postgres)
        .compile(&config, &Params::new())
        .unwrap();

    let settings = TenantSettings::default();
    let err = TenantInjector::new(&settings, "")
        .inject_query(&TenantScope::units(Caller::new(1), [3]), &mut compiled)
        .unwrap_err();
    assert_eq!(err, ScopeError::MissingUserAlias("u".into()));
    assert_eq!(err.reason(), "scope-missing-user-alias");
}

// ============================================================================
// Membership lookup
// ============================================================================

#[tokio::test]
async fn test_backend_membership_lookup() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend
        .execute_batch(
            "CREATE TABLE mdl_membership (id INTEGER PRIMARY KEY, user_id INTEGER, unit_id INTEGER);
             INSERT INTO mdl_membership (user_id, unit_id) VALUES (7, 5), (7, 9), (8, 5);",
        )
        .unwrap();
    let backend: Arc<dyn QueryBackend> = Arc::new(backend);

    let settings = TenantSettings {
        site_admins: vec![1],
        ..TenantSettings::default()
    };
    let resolver = BackendMembership::new(backend, settings, Dialect::Sqlite, "mdl_");

    let access = resolver.access(7).await.unwrap();
    assert!(!access.site_wide);
    assert_eq!(access.units, BTreeSet::from([5, 9]));

    let admin = resolver.access(1).await.unwrap();
    assert!(admin.site_wide);
    assert!(admin.units.is_empty());
}

#[tokio::test]
async fn test_membership_failure_is_reported() {
    let backend: Arc<dyn QueryBackend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
    let resolver = BackendMembership::new(backend, TenantSettings::default(), Dialect::Sqlite, "");
    let err = resolver.access(7).await.unwrap_err();
    assert!(matches!(err, ScopeError::Membership(_)));
    assert!(!err.is_definition_error());
}
