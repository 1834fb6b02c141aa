//! # Result Cache
//!
//! Bounded page cache. Eviction is strictly FIFO by insertion: reads never
//! refresh an entry's position.

use crate::executor::NormalizedResult;
use esq_core::SearchQuery;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};

/// Identity of one executed page.
///
/// Built from `(connection, index, query, sort, from, size)`. JSON objects
/// serialize with sorted keys, so two queries differing only in key order
/// share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(connection_id: &str, query: &SearchQuery) -> Self {
        let identity = json!([
            connection_id,
            query.index,
            query.query,
            query.sort,
            query.from,
            query.effective_size(),
        ]);
        Self(identity.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResultCache {
    entries: HashMap<CacheKey, NormalizedResult>,
    /// Insertion order, oldest first.
    order: VecDeque<CacheKey>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Counts toward hit/miss statistics.
    pub fn get(&mut self, key: &CacheKey) -> Option<NormalizedResult> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                tracing::debug!("Cache hit: {}", key.as_str());
                Some(entry.clone())
            }
            None => {
                self.misses += 1;
                tracing::debug!("Cache miss: {}", key.as_str());
                None
            }
        }
    }

    /// Does not count toward statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a result. Overwriting an existing key keeps its original
    /// position in the eviction order.
    pub fn insert(&mut self, key: CacheKey, result: NormalizedResult) {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = result;
            return;
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, result);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!("Cache evicted: {}", oldest.as_str());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esq_core::match_all;

    fn page(from: usize) -> SearchQuery {
        SearchQuery::new("logs", match_all()).with_window(from, 10)
    }

    fn result(total: u64) -> NormalizedResult {
        NormalizedResult {
            total,
            ..Default::default()
        }
    }

    #[test]
    fn test_key_ignores_object_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"term": {"status": "ok", "boost": 1}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"term": {"boost": 1, "status": "ok"}}"#).unwrap();
        assert_eq!(
            CacheKey::new("c1", &SearchQuery::new("logs", a)),
            CacheKey::new("c1", &SearchQuery::new("logs", b))
        );
    }

    #[test]
    fn test_key_distinguishes_connection_and_window() {
        let q = page(0);
        assert_ne!(CacheKey::new("c1", &q), CacheKey::new("c2", &q));
        assert_ne!(CacheKey::new("c1", &q), CacheKey::new("c1", &page(10)));
    }

    #[test]
    fn test_evicts_earliest_inserted_only() {
        let mut cache = ResultCache::new(3);
        for from in 0..3 {
            cache.insert(CacheKey::new("c1", &page(from)), result(from as u64));
        }
        // Reading the oldest entry must not protect it.
        assert!(cache.get(&CacheKey::new("c1", &page(0))).is_some());

        cache.insert(CacheKey::new("c1", &page(3)), result(3));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&CacheKey::new("c1", &page(0))));
        for from in 1..4 {
            assert!(cache.contains(&CacheKey::new("c1", &page(from))));
        }
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut cache = ResultCache::new(2);
        cache.insert(CacheKey::new("c1", &page(0)), result(1));
        cache.insert(CacheKey::new("c1", &page(1)), result(1));
        cache.insert(CacheKey::new("c1", &page(0)), result(99));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&CacheKey::new("c1", &page(0))).unwrap().total, 99);

        cache.insert(CacheKey::new("c1", &page(2)), result(2));
        assert!(!cache.contains(&CacheKey::new("c1", &page(0))));
    }

    #[test]
    fn test_stats_and_clear() {
        let mut cache = ResultCache::new(5);
        let key = CacheKey::new("c1", &page(0));
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), result(1));
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&key));
    }
}
