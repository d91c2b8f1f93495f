//! Path lookup cache.
//!
//! # Responsibilities
//! - Memoize resolved dot-path lookups for a TTL window
//! - Drop every entry on commit
//! - Count hits and misses
//!
//! # Design Decisions
//! - Entries carry the generation of the snapshot they were computed from;
//!   a lookup against a different generation is a miss, so a reader that
//!   raced a commit can never serve the old value afterwards
//! - Only present paths are cached, so the map stays bounded by the tree
//!   no matter how many absent paths callers ask for

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::store::{ConfigStore, Snapshot};
use crate::observability::metrics;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    generation: u64,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct PathCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PathCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolve `path` against the store's current snapshot.
    pub fn get(&self, path: &str, store: &ConfigStore) -> Option<Value> {
        self.get_in(path, &store.snapshot())
    }

    /// Resolve `path` against a specific snapshot.
    pub fn get_in(&self, path: &str, snapshot: &Arc<Snapshot>) -> Option<Value> {
        if let Some(entry) = self.entries.get(path) {
            if entry.generation == snapshot.generation && entry.inserted_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                return Some(entry.value.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);
        let value = snapshot.lookup(path).cloned()?;
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
                generation: snapshot.generation,
            },
        );
        Some(value)
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
