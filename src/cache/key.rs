//! Cache key generation.

use std::fmt;

use serde::Serialize;

use super::{compute_hash, CacheResult};
use crate::report::{ParamValue, ReportId};

/// Opaque cache key. Only ever passed back to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    params: Vec<(&'a str, String)>,
    page: u64,
    page_size: u64,
    scope: &'a str,
}

/// Parameters as sorted `(name, key form)` pairs, empty values dropped.
pub fn canonical_params<'a, I>(params: I) -> Vec<(&'a str, String)>
where
    I: IntoIterator<Item = (&'a String, &'a ParamValue)>,
{
    let mut pairs: Vec<(&str, String)> = params
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| (name.as_str(), value.key_form()))
        .collect();
    pairs.sort();
    pairs
}

/// Key for one (report, parameters, page, page size, scope) combination.
///
/// Insertion order of `params` does not matter.
pub fn generate_key<'a, I>(
    report: &ReportId,
    params: I,
    page: u64,
    page_size: u64,
    scope: &str,
) -> CacheResult<CacheKey>
where
    I: IntoIterator<Item = (&'a String, &'a ParamValue)>,
{
    let material = KeyMaterial {
        params: canonical_params(params),
        page,
        page_size,
        scope,
    };
    let key = format!("report:{}:{}", report, compute_hash(&material)?);
    tracing::debug!(%key, "generated cache key");
    Ok(CacheKey(key))
}
