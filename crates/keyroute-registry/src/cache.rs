//! Resolver-side location cache with TTL expiration and LRU eviction.
//!
//! Keyed by registration path. The cache is not internally synchronized;
//! the resolver wraps it in a `Mutex`. A cached location is only a hint:
//! the router drops it as soon as a query against it fails.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use keyroute_core::Location;
use tracing::debug;

/// Cache bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(500),
            capacity: 1024,
        }
    }
}

struct CachedLocation {
    location: Location,
    inserted_at: Instant,
    last_used: Instant,
}

/// Accumulated cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct LocationCache {
    entries: HashMap<String, CachedLocation>,
    config: CacheConfig,
    stats: CacheStats,
}

impl LocationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    /// Cached location for `path`, if present and not expired.
    pub fn get(&mut self, path: &str) -> Option<Location> {
        let ttl = self.config.ttl;
        match self.entries.get_mut(path) {
            Some(entry) if entry.inserted_at.elapsed() <= ttl => {
                entry.last_used = Instant::now();
                self.stats.hits += 1;
                debug!(
                    %path,
                    cache_hits = self.stats.hits,
                    cache_misses = self.stats.misses,
                    "location cache hit"
                );
                Some(entry.location.clone())
            }
            Some(_) => {
                self.entries.remove(path);
                self.stats.misses += 1;
                debug!(%path, cache_misses = self.stats.misses, "location cache miss (expired)");
                None
            }
            None => {
                self.stats.misses += 1;
                debug!(%path, cache_misses = self.stats.misses, "location cache miss");
                None
            }
        }
    }

    /// Insert or refresh an entry, evicting the least recently used one when full.
    pub fn insert(&mut self, path: &str, location: Location) {
        if self.config.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(path) && self.entries.len() >= self.config.capacity {
            self.evict_lru();
        }
        let now = Instant::now();
        self.entries.insert(
            path.to_string(),
            CachedLocation {
                location,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    fn evict_lru(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(path, _)| path.clone());
        if let Some(path) = lru {
            self.entries.remove(&path);
            self.stats.evictions += 1;
            debug!(%path, cache_evictions = self.stats.evictions, "location cache eviction");
        }
    }

    /// Drop the entry for `path`. Returns whether one was cached.
    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
