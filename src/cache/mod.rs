//! Report result cache.
//!
//! Results are stored as JSON under an opaque [`CacheKey`] with a creation
//! time and TTL. Expiry is checked at read time; a read that finds an expired
//! entry deletes it. Nothing is evicted in the background, and a later `set`
//! overwrites the entry.
//!
//! # Design
//!
//! - [`CacheStore`] is the storage seam: [`MemoryStore`] (process-local,
//!   concurrent map) or [`SqliteStore`] (persistent, versioned schema)
//! - [`ResultCache`] adds TTL handling and typed (de)serialization
//! - Failures are [`CacheError`]s; the pipeline treats every one as a miss
//!
//! # Key Format
//!
//! ```text
//! report:{report id}:{sha256 of typed params, page, page size, scope}
//! ```

mod hash;
mod key;
mod memory;
mod sqlite;

pub use hash::compute_hash;
pub use key::{canonical_params, generate_key, CacheKey};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache lock poisoned")]
    Poisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// One stored result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Serialized JSON payload.
    pub payload: String,
    /// Unix time in milliseconds.
    pub created_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.ttl_ms
    }
}

/// Store occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
}

/// Key-value storage for cache entries.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store `entry`, replacing any previous entry for `key`.
    fn set(&self, key: &str, entry: CacheEntry) -> CacheResult<()>;

    /// Delete the entry for `key` if it is expired as of `now_ms`.
    ///
    /// The check and delete are one step, so an entry written concurrently
    /// is never dropped. Returns whether anything was deleted.
    fn remove_expired(&self, key: &str, now_ms: u64) -> CacheResult<bool>;

    fn stats(&self) -> CacheResult<CacheStats>;
}

/// TTL-aware typed cache over a [`CacheStore`].
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache").finish_non_exhaustive()
    }
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// A cache backed by a fresh [`MemoryStore`].
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        self.get_at(key, now_ms())
    }

    /// Look up `key` as of `now_ms`; expired entries are a miss.
    pub fn get_at<T: DeserializeOwned>(&self, key: &CacheKey, now_ms: u64) -> CacheResult<Option<T>> {
        let Some(entry) = self.store.get(key.as_str())? else {
            return Ok(None);
        };
        if entry.is_expired(now_ms) {
            tracing::debug!(key = %key, "cache entry expired");
            if let Err(e) = self.store.remove_expired(key.as_str(), now_ms) {
                tracing::warn!(key = %key, error = %e, "failed to evict expired cache entry");
            }
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&entry.payload)?))
    }

    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> CacheResult<()> {
        self.set_at(key, value, ttl, now_ms())
    }

    pub fn set_at<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        now_ms: u64,
    ) -> CacheResult<()> {
        let entry = CacheEntry {
            payload: serde_json::to_string(value)?,
            created_at_ms: now_ms,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        self.store.set(key.as_str(), entry)
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        self.store.stats()
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
