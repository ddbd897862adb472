//! In-process cache store.

use dashmap::DashMap;

use super::{CacheEntry, CacheResult, CacheStats, CacheStore};

/// Concurrent in-memory store; per-key sets are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    fn set(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn remove_expired(&self, key: &str, now_ms: u64) -> CacheResult<bool> {
        Ok(self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now_ms))
            .is_some())
    }

    fn stats(&self) -> CacheResult<CacheStats> {
        let bytes = self
            .entries
            .iter()
            .map(|e| e.value().payload.len() as u64)
            .sum();
        Ok(CacheStats {
            entries: self.entries.len() as u64,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_remove_expired_keeps_fresh_entries() {
        let store = MemoryStore::new();
        let entry = CacheEntry {
            payload: "[]".into(),
            created_at_ms: 1_000,
            ttl_ms: 500,
        };
        store.set("k", entry).unwrap();

        assert!(!store.remove_expired("k", 1_400).unwrap());
        assert!(store.get("k").unwrap().is_some());
        assert!(store.remove_expired("k", 1_501).unwrap());
        assert!(store.get("k").unwrap().is_none());
        assert!(!store.remove_expired("missing", 1_501).unwrap());
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..50u64 {
                        let entry = CacheEntry {
                            payload: format!("{}", i * 100 + n),
                            created_at_ms: n,
                            ttl_ms: 1_000,
                        };
                        store.set(&format!("k{}", n % 10), entry).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.stats().unwrap().entries, 10);
    }
}
