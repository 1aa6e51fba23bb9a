//! Lookup cache — natural key → surrogate key, optionally key → row.
//!
//! # Coherency
//!
//! Entries are written from the values the dimension sent to the store.
//! They stay valid only as long as the store keeps those values unchanged
//! (no defaults, triggers or coercion on cached columns).
//!
//! # Completeness
//!
//! A cache that was prefilled, caches on insert and never evicted anything
//! holds every member: a miss is then a definite answer and the store is not
//! queried.

pub mod fifo;

pub use fifo::FifoCache;

use crate::config::CacheConfig;
use crate::error::{DimxError, DimxResult};
use crate::row::{NaturalKey, Row, Value};
use std::num::NonZeroUsize;

/// Answer of a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Hit(Value),
    /// The cache is complete and the member does not exist.
    Absent,
    /// Ask the store.
    Unknown,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub entries: usize,
    pub evictions: u64,
}

pub struct LookupCache {
    keys: FifoCache<NaturalKey, Value>,
    rows: Option<FifoCache<Value, Row>>,
    cache_on_insert: bool,
    prefilled: bool,
    /// A prefill query limited with FETCH FIRST came back full.
    truncated: bool,
    hits: u64,
    misses: u64,
}

impl LookupCache {
    pub fn new(config: &CacheConfig) -> DimxResult<Self> {
        let (keys, rows) = match config.size {
            None => (
                FifoCache::unbounded(),
                config.cache_full_rows.then(FifoCache::unbounded),
            ),
            Some(size) => {
                let cap = NonZeroUsize::new(size).ok_or_else(|| {
                    DimxError::Configuration(
                        "cache size must be positive; omit the cache to disable caching".into(),
                    )
                })?;
                (
                    FifoCache::bounded(cap),
                    config.cache_full_rows.then(|| FifoCache::bounded(cap)),
                )
            }
        };
        Ok(Self {
            keys,
            rows,
            cache_on_insert: config.cache_on_insert,
            prefilled: false,
            truncated: false,
            hits: 0,
            misses: 0,
        })
    }

    pub fn caches_rows(&self) -> bool {
        self.rows.is_some()
    }

    pub fn caches_on_insert(&self) -> bool {
        self.cache_on_insert
    }

    pub fn capacity(&self) -> Option<usize> {
        self.keys.capacity()
    }

    /// Record that the cache was filled from the store. `truncated` tells
    /// that the fill query may have left members behind.
    pub fn mark_prefilled(&mut self, truncated: bool) {
        self.prefilled = true;
        self.truncated = truncated;
    }

    pub fn is_complete(&self) -> bool {
        self.prefilled && self.cache_on_insert && !self.truncated && self.keys.evictions() == 0
    }

    pub fn probe(&mut self, nk: &NaturalKey) -> Probe {
        match self.keys.get(nk) {
            Some(key) => {
                self.hits += 1;
                Probe::Hit(key.clone())
            }
            None => {
                self.misses += 1;
                if self.is_complete() {
                    Probe::Absent
                } else {
                    Probe::Unknown
                }
            }
        }
    }

    pub fn record(&mut self, nk: NaturalKey, key: Value) {
        self.keys.insert(nk, key);
    }

    /// No-op unless full rows are cached.
    pub fn record_row(&mut self, key: Value, row: Row) {
        if let Some(rows) = &mut self.rows {
            rows.insert(key, row);
        }
    }

    pub fn row(&self, key: &Value) -> Option<&Row> {
        self.rows.as_ref().and_then(|rows| rows.get(key))
    }

    pub fn forget(&mut self, nk: &NaturalKey) {
        self.keys.remove(nk);
    }

    pub fn forget_row(&mut self, key: &Value) {
        if let Some(rows) = &mut self.rows {
            rows.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_ratio: self.hit_ratio(),
            entries: self.keys.len(),
            evictions: self.keys.evictions(),
        }
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("stats", &self.stats())
            .field("complete", &self.is_complete())
            .finish()
    }
}
