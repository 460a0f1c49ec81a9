//! Read-through LRU cache bounded by total bytes held.

use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use zarrs::storage::{
    ListableStorageTraits, MaybeBytes, MaybeBytesIterator, ReadableStorageTraits, StorageError,
    StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix,
    byte_range::{ByteRange, ByteRangeIterator},
};

/// Default byte budget (1 GiB).
pub const DEFAULT_MAX_SIZE: u64 = 1 << 30;

struct State {
    entries: LruCache<String, Bytes>,
    used: u64,
}

/// Caches whole values returned by `get` of a wrapped store.
///
/// Absent keys and values larger than the budget are never cached.
/// Listing and partial reads pass straight through.
pub struct LruCacheStore<R: ?Sized> {
    inner: Arc<R>,
    max_size: u64,
    state: Mutex<State>,
}

impl<R: ?Sized> LruCacheStore<R> {
    pub fn new(inner: Arc<R>, max_size: u64) -> Self {
        Self {
            inner,
            max_size,
            state: Mutex::new(State {
                entries: LruCache::unbounded(),
                used: 0,
            }),
        }
    }

    /// Bytes currently held.
    pub fn current_size(&self) -> u64 {
        self.state.lock().used
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached value.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.used = 0;
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        self.state.lock().entries.get(key).cloned()
    }

    fn insert(&self, key: &str, value: &Bytes) {
        let size = value.len() as u64;
        if size > self.max_size {
            log::trace!("not caching {key}: {size} bytes exceeds the cache size");
            return;
        }
        let mut state = self.state.lock();
        if let Some(old) = state.entries.put(key.to_string(), value.clone()) {
            state.used -= old.len() as u64;
        }
        state.used += size;
        while state.used > self.max_size {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.used -= evicted.len() as u64,
                None => break,
            }
        }
    }
}

impl<R: ReadableStorageTraits + ?Sized> ReadableStorageTraits for LruCacheStore<R> {
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match self.lookup(key.as_str()) {
            Some(value) => Ok(Some(value.len() as u64)),
            None => self.inner.size_key(key),
        }
    }

    fn supports_get_partial(&self) -> bool {
        self.inner.supports_get_partial()
    }

    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        if let Some(value) = self.lookup(key.as_str()) {
            return Ok(Some(value));
        }
        let value = self.inner.get(key)?;
        if let Some(bytes) = &value {
            self.insert(key.as_str(), bytes);
        }
        Ok(value)
    }

    fn get_partial_many<'a>(
        &'a self,
        key: &StoreKey,
        byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        self.inner.get_partial_many(key, byte_ranges)
    }

    fn get_partial(
        &self,
        key: &StoreKey,
        byte_range: ByteRange,
    ) -> Result<MaybeBytes, StorageError> {
        self.inner.get_partial(key, byte_range)
    }
}

impl<R: ListableStorageTraits + ?Sized> ListableStorageTraits for LruCacheStore<R> {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.inner.list()
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        self.inner.list_prefix(prefix)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        self.inner.list_dir(prefix)
    }

    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        self.inner.size_prefix(prefix)
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.inner.size()
    }
}
