//! SQLite-backed cache store.
//!
//! Entries survive restarts. The schema is versioned; a version mismatch
//! clears the store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheEntry, CacheError, CacheResult, CacheStats, CacheStore};

/// Current cache schema version. Bump this when the cache format changes.
const CACHE_VERSION: i32 = 1;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the cache database at `path`.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory cache (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Initialize the cache schema and check version.
    fn init(&self) -> CacheResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS results (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored_version {
            Some(v) if v == CACHE_VERSION => {}
            Some(_) => {
                conn.execute("DELETE FROM results", [])?;
                set_version(&conn)?;
            }
            None => set_version(&conn)?,
        }
        Ok(())
    }
}

fn set_version(conn: &Connection) -> CacheResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
        params![CACHE_VERSION.to_string()],
    )?;
    Ok(())
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT payload, created_at_ms, ttl_ms FROM results WHERE key = ?",
                params![key],
                |row| {
                    Ok(CacheEntry {
                        payload: row.get(0)?,
                        created_at_ms: to_u64(row.get(1)?),
                        ttl_ms: to_u64(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn set(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO results (key, payload, created_at_ms, ttl_ms) VALUES (?, ?, ?, ?)",
            params![
                key,
                entry.payload,
                to_i64(entry.created_at_ms),
                to_i64(entry.ttl_ms)
            ],
        )?;
        Ok(())
    }

    fn remove_expired(&self, key: &str, now_ms: u64) -> CacheResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM results WHERE key = ? AND ? - created_at_ms > ttl_ms",
            params![key, to_i64(now_ms)],
        )?;
        Ok(deleted > 0)
    }

    fn stats(&self) -> CacheResult<CacheStats> {
        let conn = self.conn()?;
        let (entries, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM results",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CacheStats {
            entries: to_u64(entries),
            bytes: to_u64(bytes),
        })
    }
}
