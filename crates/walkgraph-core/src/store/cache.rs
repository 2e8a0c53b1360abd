//! Record Cache
//!
//! LRU cache of decoded anchor records in front of the database. Writes
//! invalidate the affected ids; reads fill the cache on a miss.
//!
//! Thread-safe via interior mutability using parking_lot::Mutex.

use super::record::AnchorRecord;
use crate::anchor::AnchorId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Cache metrics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that went to the database
    pub misses: u64,
    /// Entries dropped because of writes
    pub invalidations: u64,
}

impl CacheMetrics {
    /// Hit rate between 0.0 and 1.0
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    records: LruCache<AnchorId, AnchorRecord>,
    metrics: CacheMetrics,
}

/// Bounded LRU cache keyed by anchor id.
pub struct RecordCache {
    state: Mutex<CacheState>,
}

impl RecordCache {
    /// A cache holding at most `capacity` records (minimum one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                records: LruCache::new(capacity),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    /// Look up a record, updating LRU order and hit/miss counters.
    pub fn get(&self, id: &AnchorId) -> Option<AnchorRecord> {
        let mut state = self.state.lock();
        match state.records.get(id).cloned() {
            Some(record) => {
                state.metrics.hits += 1;
                Some(record)
            }
            None => {
                state.metrics.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, record: AnchorRecord) {
        self.state.lock().records.put(record.id, record);
    }

    pub fn invalidate(&self, id: &AnchorId) {
        let mut state = self.state.lock();
        if state.records.pop(id).is_some() {
            state.metrics.invalidations += 1;
        }
    }

    pub fn clear(&self) {
        self.state.lock().records.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.state.lock().metrics.clone()
    }
}
