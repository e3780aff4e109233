//! Bounded LRU cache with in-flight load tracking.
//!
//! This module backs both the tile cache and the chunk cache. Entries are
//! keyed by string and kept in recency order; inserting past capacity evicts
//! the least recently used entry. Alongside the entries the cache tracks
//! which keys are currently being loaded so concurrent requests for the same
//! key can wait for one fetch instead of issuing their own.
//!
//! # Resource release
//!
//! The cache calls [`CachePayload::release`] exactly once for every payload
//! that leaves the cache: on eviction, replacement, deletion and
//! [`BoundedCache::clear`]. The default hands back the cache's copy. Payloads
//! that share an external resource with clones given to callers (an uploaded
//! bitmap, for example) free it only when the last clone goes away.
//!
//! # Thread Safety
//!
//! Entries and the loading set live behind one mutex, so a key is never
//! observed as both cached and loading by a racing caller. The lock is
//! never held across an await or while releasing a payload.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

// =============================================================================
// Payload
// =============================================================================

/// A value that can live in a [`BoundedCache`].
pub trait CachePayload: Clone + Send + Sync + 'static {
    /// Give up the cache's copy, freeing any resource it solely owns.
    fn release(self) {}

    /// True when `self` and `other` own the same external resource.
    ///
    /// Replacing an entry with a payload that shares its resource does not
    /// release the old one.
    fn shares_resource(&self, _other: &Self) -> bool {
        false
    }
}

// =============================================================================
// Cache
// =============================================================================

struct CacheState<P> {
    entries: LruCache<String, P>,
    loading: HashMap<String, Arc<Notify>>,
}

/// LRU cache bounded by entry count.
pub struct BoundedCache<P: CachePayload> {
    state: Mutex<CacheState<P>>,
    capacity: NonZeroUsize,
}

impl<P: CachePayload> BoundedCache<P> {
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                loading: HashMap::new(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Whether `key` is cached. Does not affect recency.
    pub fn has(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Cached payload for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<P> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Insert `payload` as the most recently used entry.
    ///
    /// Evicts the least recently used entry when the cache is full. Evicted
    /// and replaced payloads are released.
    pub fn set(&self, key: impl Into<String>, payload: P) {
        let key = key.into();
        let displaced = {
            let mut state = self.state.lock();
            let displaced = state.entries.push(key.clone(), payload.clone());
            displaced.map(|(old_key, old)| (old_key != key, old))
        };

        if let Some((evicted, old)) = displaced {
            if evicted {
                debug!(key = %key, capacity = self.capacity(), "cache full, evicted oldest entry");
                old.release();
            } else if !old.shares_resource(&payload) {
                old.release();
            }
        }
    }

    /// Remove and release `key`. Returns whether it was cached.
    ///
    /// Any in-flight load for the key is unaffected.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.state.lock().entries.pop(key);
        match removed {
            Some(payload) => {
                payload.release();
                true
            }
            None => false,
        }
    }

    /// Release every entry and forget all in-flight loads.
    ///
    /// Tasks waiting in [`BoundedCache::wait_for`] are woken.
    pub fn clear(&self) {
        let (entries, loading) = {
            let mut state = self.state.lock();
            let entries: Vec<P> = std::iter::from_fn(|| state.entries.pop_lru())
                .map(|(_, payload)| payload)
                .collect();
            let loading: Vec<Arc<Notify>> = state.loading.drain().map(|(_, n)| n).collect();
            (entries, loading)
        };

        debug!(entries = entries.len(), loading = loading.len(), "clearing cache");
        for payload in entries {
            payload.release();
        }
        for notify in loading {
            notify.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    // -------------------------------------------------------------------------
    // In-flight tracking
    // -------------------------------------------------------------------------

    pub fn is_loading(&self, key: &str) -> bool {
        self.state.lock().loading.contains_key(key)
    }

    /// Mark `key` as loading. Returns `false` if it already was.
    pub fn start_loading(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if state.loading.contains_key(key) {
            return false;
        }
        state.loading.insert(key.to_string(), Arc::new(Notify::new()));
        true
    }

    /// Clear the loading mark for `key` and wake its waiters.
    pub fn done_loading(&self, key: &str) {
        let notify = self.state.lock().loading.remove(key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    pub fn loading_count(&self) -> usize {
        self.state.lock().loading.len()
    }

    /// Mark `key` as loading for the lifetime of the returned guard.
    ///
    /// Returns `None` when another load is already in flight. Dropping the
    /// guard calls [`BoundedCache::done_loading`], including when the loading
    /// future is cancelled.
    pub fn begin_loading(&self, key: &str) -> Option<LoadingGuard<'_, P>> {
        self.start_loading(key).then(|| LoadingGuard {
            cache: self,
            key: key.to_string(),
        })
    }

    /// Wait until the in-flight load of `key` finishes.
    ///
    /// Returns immediately when nothing is loading.
    pub async fn wait_for(&self, key: &str) {
        let notify = {
            let state = self.state.lock();
            match state.loading.get(key) {
                Some(notify) => notify.clone(),
                None => return,
            }
        };

        // Registered before the re-check, so a wakeup in between is not lost
        let notified = notify.notified();
        let still_loading = self
            .state
            .lock()
            .loading
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &notify));
        if still_loading {
            notified.await;
        }
    }
}

/// Loading mark released on drop. See [`BoundedCache::begin_loading`].
pub struct LoadingGuard<'a, P: CachePayload> {
    cache: &'a BoundedCache<P>,
    key: String,
}

impl<P: CachePayload> LoadingGuard<'_, P> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<P: CachePayload> Drop for LoadingGuard<'_, P> {
    fn drop(&mut self) {
        self.cache.done_loading(&self.key);
    }
}
