//! Read-through cache over entries and folder listings.
//!
//! A cached value for path P is only valid while nothing at or below P has
//! changed, so every mutation evicts the keys of the changed path and all of
//! its ancestors, plus the whole-tree listing. Invalidation bumps an epoch
//! under the write lock; a read-through fill that started before the bump is
//! discarded instead of resurrecting a stale value.

use fbed_core::{path, Entry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Complete info of one file or folder
    Info(String),
    /// Simple entries of a folder's children
    Listing(String),
    /// Flattened complete info of every file in the store
    AllFiles,
}

impl CacheKey {
    fn path(&self) -> &str {
        match self {
            CacheKey::Info(p) | CacheKey::Listing(p) => p,
            CacheKey::AllFiles => path::ROOT,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CachedValue {
    Entry(Entry),
    Listing(Vec<Entry>),
}

#[derive(Default)]
pub struct PathCache {
    map: RwLock<HashMap<CacheKey, CachedValue>>,
    epoch: AtomicU64,
    cascades: AtomicU64,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.map.read().get(key).cloned()
    }

    pub fn get_entry(&self, key: &CacheKey) -> Option<Entry> {
        match self.get(key)? {
            CachedValue::Entry(e) => Some(e),
            CachedValue::Listing(_) => None,
        }
    }

    pub fn get_listing(&self, key: &CacheKey) -> Option<Vec<Entry>> {
        match self.get(key)? {
            CachedValue::Listing(l) => Some(l),
            CachedValue::Entry(_) => None,
        }
    }

    /// Epoch to capture before computing a value for `put_if_current`.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Unconditional insert.
    pub fn put(&self, key: CacheKey, value: CachedValue) {
        self.map.write().insert(key, value);
    }

    /// Insert only if no invalidation ran since `epoch` was read.
    ///
    /// Returns whether the value was stored.
    pub fn put_if_current(&self, key: CacheKey, value: CachedValue, epoch: u64) -> bool {
        let mut map = self.map.write();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        map.insert(key, value);
        true
    }

    /// Evict every key at or above any of `changed`, and the whole-tree key.
    ///
    /// One call is one cascade regardless of how many paths it covers.
    pub fn invalidate_ancestors<S: AsRef<str>>(&self, changed: &[S]) {
        let mut map = self.map.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cascades.fetch_add(1, Ordering::Relaxed);

        let before = map.len();
        map.retain(|key, _| {
            if *key == CacheKey::AllFiles {
                return false;
            }
            !changed
                .iter()
                .any(|p| path::is_within(p.as_ref(), key.path()))
        });
        debug!(
            paths = changed.len(),
            evicted = before - map.len(),
            "cache invalidated"
        );
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut map = self.map.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        map.clear();
    }

    /// Number of invalidation cascades run so far
    pub fn cascades(&self) -> u64 {
        self.cascades.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(p: &str) -> (CacheKey, CachedValue) {
        (
            CacheKey::Listing(p.to_string()),
            CachedValue::Listing(vec![Entry::simple(&path::join(p, "child"), true)]),
        )
    }

    #[test]
    fn invalidation_evicts_ancestors_only() {
        let cache = PathCache::new();
        for p in ["/", "/a", "/a/b", "/a/b/c", "/x", "/ab"] {
            let (k, v) = listing(p);
            cache.put(k, v);
        }
        cache.put(CacheKey::AllFiles, CachedValue::Listing(vec![]));
        cache.put(
            CacheKey::Info("/a/b/c.txt".into()),
            CachedValue::Entry(Entry::file("/a/b/c.txt", 1, "x".into())),
        );

        cache.invalidate_ancestors(&["/a/b/c.txt"]);

        for gone in ["/", "/a", "/a/b"] {
            assert!(cache.get(&CacheKey::Listing(gone.into())).is_none(), "{gone}");
        }
        assert!(cache.get(&CacheKey::AllFiles).is_none());
        assert!(cache.get(&CacheKey::Info("/a/b/c.txt".into())).is_none());
        // /a/b/c is a sibling of the changed file, /ab only shares a prefix
        for kept in ["/a/b/c", "/x", "/ab"] {
            assert!(cache.get(&CacheKey::Listing(kept.into())).is_some(), "{kept}");
        }
        assert_eq!(cache.cascades(), 1);
    }

    #[test]
    fn stale_fill_is_discarded() {
        let cache = PathCache::new();
        let epoch = cache.epoch();
        cache.invalidate_ancestors(&["/a"]);
        let (k, v) = listing("/a");
        assert!(!cache.put_if_current(k.clone(), v.clone(), epoch));
        assert!(cache.is_empty());
        assert!(cache.put_if_current(k, v, cache.epoch()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn typed_getters() {
        let cache = PathCache::new();
        let (k, v) = listing("/a");
        cache.put(k.clone(), v);
        assert!(cache.get_listing(&k).is_some());
        assert!(cache.get_entry(&k).is_none());
    }
}
