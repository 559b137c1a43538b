//! TTL keyed response cache.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

/// Longest lifetime an entry can get.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Response cache keyed by [`ApiRequest::cache_key`](crate::ApiRequest::cache_key).
///
/// Entries expire after their TTL; expired entries are dropped lazily on
/// lookup and by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value for `ttl`. A TTL past what `Instant` can represent is
    /// clamped to [`MAX_TTL`].
    pub fn insert(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now);
        let entry = CacheEntry { value, expires_at };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let cache = ResponseCache::new();
        cache.insert("k", json!({"v": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap()["v"], 1);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = ResponseCache::new();
        cache.insert("gone", json!(1), Duration::ZERO);
        cache.insert("kept", json!(2), Duration::from_secs(60));

        assert!(cache.get("gone").is_none());
        assert_eq!(cache.len(), 1);

        cache.insert("gone-too", json!(3), Duration::ZERO);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("kept"), Some(json!(2)));
    }

    #[test]
    fn test_unbounded_ttl_is_clamped() {
        let cache = ResponseCache::new();
        cache.insert("forever", json!({"v": 1}), Duration::MAX);

        assert_eq!(cache.get("forever").unwrap()["v"], 1);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResponseCache::new();
        cache.insert("a", json!(1), Duration::from_secs(60));
        cache.insert("b", json!(2), Duration::from_secs(60));

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(!cache.is_empty());

        cache.clear();
        assert!(cache.is_empty());
    }
}
