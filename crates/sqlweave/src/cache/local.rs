use super::key::CacheKey;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One local-cache slot.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// The building sentinel: a query for this key is in flight and its
    /// results are not yet reified. A deferred-load probe uses this to
    /// tell "in progress" apart from "absent".
    InProgress,
    /// A fully materialized result list.
    Ready(Arc<Vec<Value>>),
}

/// The session-scoped first-level result cache.
///
/// Unbounded, no eviction; cleared explicitly on writes, flushes,
/// commit/rollback, and (under statement scope) at the end of each
/// top-level query. Owned by a single executor, so no locking.
#[derive(Debug, Default)]
pub struct LocalCache {
    map: HashMap<CacheKey, CacheEntry>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.map.get(key)
    }

    /// The materialized list for `key`, if present and not in progress.
    pub fn ready(&self, key: &CacheKey) -> Option<Arc<Vec<Value>>> {
        match self.map.get(key) {
            Some(CacheEntry::Ready(rows)) => Some(rows.clone()),
            _ => None,
        }
    }

    /// Install the building sentinel for `key`.
    pub fn put_building(&mut self, key: CacheKey) {
        self.map.insert(key, CacheEntry::InProgress);
    }

    /// Install a materialized result list for `key`.
    pub fn put(&mut self, key: CacheKey, rows: Arc<Vec<Value>>) {
        self.map.insert(key, CacheEntry::Ready(rows));
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.map.remove(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether any slot still holds the building sentinel. Diagnostic;
    /// after any completed query this must be false.
    pub fn has_in_progress(&self) -> bool {
        self.map
            .values()
            .any(|entry| matches!(entry, CacheEntry::InProgress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        let mut k = CacheKey::new();
        k.absorb_str(name);
        k
    }

    #[test]
    fn sentinel_is_distinct_from_ready_and_absent() {
        let mut cache = LocalCache::new();
        let k = key("a");
        assert!(cache.get(&k).is_none());

        cache.put_building(k.clone());
        assert!(matches!(cache.get(&k), Some(CacheEntry::InProgress)));
        assert!(cache.ready(&k).is_none());
        assert!(cache.has_in_progress());

        cache.put(k.clone(), Arc::new(vec![json!({"id": 1})]));
        assert!(cache.ready(&k).is_some());
        assert!(!cache.has_in_progress());
    }

    #[test]
    fn ready_hands_back_the_identical_list() {
        let mut cache = LocalCache::new();
        let k = key("a");
        let rows = Arc::new(vec![json!(1)]);
        cache.put(k.clone(), rows.clone());
        let hit = cache.ready(&k).unwrap();
        assert!(Arc::ptr_eq(&rows, &hit));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut cache = LocalCache::new();
        cache.put(key("a"), Arc::new(Vec::new()));
        cache.clear();
        assert!(cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
