//! Bounded first-in-first-out map.
//!
//! Built on `lru::LruCache`, touching entries only through `peek`,
//! `peek_mut` and `push` so that recency is never refreshed: the entry
//! evicted is always the one inserted first. Replacing the value of a
//! present key keeps its position.

use ahash::RandomState;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

#[derive(Debug)]
pub struct FifoCache<K: Hash + Eq, V> {
    inner: LruCache<K, V, RandomState>,
    capacity: Option<NonZeroUsize>,
    evictions: u64,
}

impl<K: Hash + Eq, V> FifoCache<K, V> {
    /// Cache holding at most `capacity` entries.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            inner: LruCache::with_hasher(capacity, RandomState::new()),
            capacity: Some(capacity),
            evictions: 0,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            inner: LruCache::unbounded_with_hasher(RandomState::new()),
            capacity: None,
            evictions: 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    /// Insert or replace. Returns the entry evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.inner.peek_mut(&key) {
            *slot = value;
            return None;
        }
        let evicted = self.inner.push(key, value);
        if evicted.is_some() {
            self.evictions += 1;
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.inner.len() >= cap.get())
    }

    /// Entries dropped because the cache was full.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter().rev()
    }
}
