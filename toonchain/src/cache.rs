//! Bounded cache for content-addressed documents.
//!
//! Only immutable IPFS content goes through here. Unlock state is always asked from the chain.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

#[derive(Debug)]
pub struct ContentCache<V> {
    inner: Option<Mutex<LruCache<String, V>>>,
}

impl<V: Clone> ContentCache<V> {
    /// A capacity of zero gives a cache that stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self { inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))) }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let cache = self.inner.as_ref()?;
        let mut guard = cache.lock().ok()?;
        guard.get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: V) {
        if let Some(cache) = self.inner.as_ref() {
            if let Ok(mut guard) = cache.lock() {
                guard.put(key.to_string(), value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().and_then(|c| c.lock().ok().map(|g| g.len())).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = ContentCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = ContentCache::new(0);
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }
}
