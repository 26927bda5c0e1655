use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

/// Bounded, process-local LRU cache fronting `QueryEngine` results
/// (spec.md §4.4). No TTL: entries only leave via eviction or an explicit
/// [`ResponseCache::clear`] after an ingestion pass (Design Notes §9,
/// "Response cache invalidation").
pub struct ResponseCache {
    inner: Mutex<LruCache<String, Value>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the cached value, promoting it to most-recently-used.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: String, value: Value) {
        self.inner.lock().put(key, value);
    }

    /// Drops every entry. Called after each ingestion pass and at process
    /// start, since the cache has no other invalidation mechanism.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_promotes_to_most_recently_used() {
        let cache = ResponseCache::new(2);
        cache.set("a".into(), json!(1));
        cache.set("b".into(), json!(2));
        // touch "a" so "b" becomes the least-recent entry
        assert_eq!(cache.get("a"), Some(json!(1)));
        cache.set("c".into(), json!(3));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ResponseCache::new(10);
        cache.set("a".into(), json!(1));
        cache.clear();
        assert_eq!(cache.get("a"), None);
    }
}
