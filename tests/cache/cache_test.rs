//! Integration tests for result caching: key canonicalisation, TTL and the
//! persistent store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quarry::cache::{generate_key, ResultCache, SqliteStore};
use quarry::report::{ParamValue, ReportId, ReportKind};

fn report() -> ReportId {
    ReportId::Builtin(ReportKind::CourseCompletions)
}

#[test]
fn test_key_ignores_parameter_order() {
    let pairs = [
        ("since", ParamValue::Int(1_700_000_000)),
        ("course", ParamValue::Int(42)),
        ("city", ParamValue::from("Perth")),
        ("units", ParamValue::from(vec![3i64, 1])),
    ];

    let mut forward = HashMap::new();
    for (name, value) in pairs.iter().cloned() {
        forward.insert(name.to_string(), value);
    }
    let mut backward = HashMap::with_capacity(64);
    for (name, value) in pairs.iter().rev().cloned() {
        backward.insert(name.to_string(), value);
    }

    assert_eq!(
        generate_key(&report(), &forward, 0, 50, "all").unwrap(),
        generate_key(&report(), &backward, 0, 50, "all").unwrap()
    );
}

#[test]
fn test_key_tracks_values() {
    let a: HashMap<String, ParamValue> = [("course".to_string(), ParamValue::Int(1))].into();
    let b: HashMap<String, ParamValue> = [("course".to_string(), ParamValue::Int(2))].into();
    assert_ne!(
        generate_key(&report(), &a, 0, 50, "all").unwrap(),
        generate_key(&report(), &b, 0, 50, "all").unwrap()
    );
}

#[test]
fn test_key_tracks_value_types() {
    let key_for = |value: ParamValue| {
        let params: HashMap<String, ParamValue> = [("names".to_string(), value)].into();
        generate_key(&report(), &params, 0, 50, "all").unwrap()
    };

    let list = key_for(ParamValue::from(vec!["ana", "ben"]));
    let joined = key_for(ParamValue::from("ana,ben"));
    assert_ne!(list, joined);
    assert_ne!(list, key_for(ParamValue::from(vec!["ana,ben"])));

    let int = key_for(ParamValue::Int(1));
    assert_ne!(int, key_for(ParamValue::from("1")));
    assert_ne!(int, key_for(ParamValue::Bool(true)));
    assert_eq!(int, key_for(ParamValue::Int(1)));
}

#[test]
fn test_key_separates_reports() {
    let params: HashMap<String, ParamValue> = HashMap::new();
    let builtin = generate_key(&report(), &params, 0, 50, "all").unwrap();
    let custom = generate_key(&ReportId::Custom(7), &params, 0, 50, "all").unwrap();
    assert_ne!(builtin, custom);
    assert!(builtin.as_str().starts_with("report:course_completions:"));
}

#[test]
fn test_entry_expires_after_ttl() {
    let cache = ResultCache::memory();
    let params: HashMap<String, ParamValue> = HashMap::new();
    let key = generate_key(&report(), &params, 0, 50, "all").unwrap();

    cache
        .set_at(&key, &serde_json::json!({"total": 3}), Duration::from_secs(300), 10_000)
        .unwrap();

    let fresh: Option<serde_json::Value> = cache.get_at(&key, 10_000 + 299_000).unwrap();
    assert_eq!(fresh, Some(serde_json::json!({"total": 3})));

    let stale: Option<serde_json::Value> = cache.get_at(&key, 10_000 + 301_000).unwrap();
    assert_eq!(stale, None);
}

#[test]
fn test_sqlite_store_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("quarry-cache-it-{}", std::process::id()));
    let path = dir.join("nested").join("results.db");
    let params: HashMap<String, ParamValue> = HashMap::new();
    let key = generate_key(&report(), &params, 2, 25, "units:5").unwrap();

    {
        let cache = ResultCache::new(Arc::new(SqliteStore::open(&path).unwrap()));
        cache
            .set(&key, &vec!["a".to_string(), "b".to_string()], Duration::from_secs(600))
            .unwrap();
    }

    let cache = ResultCache::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let value: Option<Vec<String>> = cache.get(&key).unwrap();
    assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    assert_eq!(cache.stats().unwrap().entries, 1);

    let _ = std::fs::remove_dir_all(&dir);
}
