//! Bounded string-normalization cache.
//!
//! String-heavy events pay one uppercase pass per *distinct* string, not per
//! occurrence: the cache maps a raw attribute string to a shared
//! `(raw, normalized)` pair of `Arc<str>`s, so a hit allocates nothing.
//! Normalization is pure, which makes racing writers benign - last writer
//! wins with an identical value.
//!
//! Sharded LRU under short `parking_lot` critical sections; capacity is
//! enforced per shard by LRU eviction.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::NormalizationConfig;

/// A raw attribute string and its normalized (upper-cased) form, both shared.
#[derive(Debug, Clone)]
pub struct CachedStr {
    pub raw: Arc<str>,
    pub normalized: Arc<str>,
}

/// Sharded, bounded raw -> normalized cache.
pub struct NormalizationCache {
    shards: Box<[Mutex<LruCache<Box<str>, CachedStr>>]>,
    shard_mask: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NormalizationCache {
    /// Build a cache from config; shard count is rounded up to a power of
    /// two and total capacity split evenly across shards.
    pub fn new(config: &NormalizationConfig) -> Self {
        let shard_count = config.shards.max(1).next_power_of_two();
        let per_shard = (config.capacity / shard_count).max(1);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        NormalizationCache {
            shards,
            shard_mask: shard_count - 1,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up (or compute and insert) the normalized form of `s`.
    pub fn normalize(&self, s: &str) -> CachedStr {
        let shard = &self.shards[self.shard_of(s)];
        if let Some(found) = shard.lock().get(s) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return found.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let entry = CachedStr {
            raw: Arc::from(s),
            normalized: Arc::from(s.to_uppercase().as_str()),
        };
        shard.lock().put(Box::from(s), entry.clone());
        entry
    }

    /// Hit/miss/entry counts.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.shards.iter().map(|s| s.lock().len()).sum(),
        }
    }

    fn shard_of(&self, s: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        s.hash(&mut hasher);
        (hasher.finish() as usize) & self.shard_mask
    }
}

impl std::fmt::Debug for NormalizationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizationCache")
            .field("shards", &self.shards.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of normalization-cache counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}
