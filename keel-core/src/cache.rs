//! Bounded in-process cache collaborator.

use lru::LruCache;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

type CacheValue = Arc<dyn Any + Send + Sync>;

/// Least-recently-used cache shared by the services of an internal provider.
///
/// Applications may supply their own instance with `use_memory_cache`; the
/// core only stores it and hands it back through `get_service`.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheValue>>,
}

impl MemoryCache {
    /// Default capacity.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Cache holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached value for `key`, if present and of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.entries.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Cache `value` under `key`.
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: Arc<T>) {
        self.entries.lock().put(key.into(), value);
    }

    /// Cached value for `key`, computing it on a miss.
    pub fn get_or_insert_with<T, F>(&self, key: &str, create: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get::<T>(key) {
            return value;
        }
        let value = Arc::new(create());
        self.set(key, value.clone());
        value
    }

    /// Remove `key`.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("MemoryCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}
