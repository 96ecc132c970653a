//! In-process result caches
//!
//! Provides:
//! - An LRU cache with optional per-entry TTL
//! - Three independent channels (keyword, semantic, rag)
//! - Normalized, hashed query keys
//! - Hit/miss/eviction accounting per channel

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::CacheSettings;
use crate::errors::Result;
use crate::metrics;

/// One cached value
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }
}

/// Counters for a single cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub sets: u64,
    pub deletes: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit (0.0 when nothing was looked up)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }

    fn absorb(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
        self.sets += other.sets;
        self.deletes += other.deletes;
        self.size += other.size;
        self.capacity += other.capacity;
    }
}

struct Inner<V> {
    // Front is least recently used, back is most recently used.
    entries: IndexMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// LRU cache with optional TTL. All operations take the internal lock once
/// and never hold it across an await.
pub struct TtlLruCache<V> {
    capacity: usize,
    ttl: Option<Duration>,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                entries: IndexMap::with_capacity(capacity.min(1024)),
                stats: CacheStats {
                    capacity,
                    ..CacheStats::default()
                },
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Look up a key. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let Some(index) = inner.entries.get_index_of(key) else {
            inner.stats.misses += 1;
            return None;
        };

        let expired = inner
            .entries
            .get_index(index)
            .map(|(_, entry)| entry.is_expired(now))
            .unwrap_or(false);

        if expired {
            inner.entries.shift_remove_index(index);
            inner.stats.misses += 1;
            inner.stats.expirations += 1;
            inner.stats.size = inner.entries.len();
            return None;
        }

        let last = inner.entries.len() - 1;
        inner.entries.move_index(index, last);
        inner.stats.hits += 1;
        inner.entries.get_index(last).map(|(_, entry)| entry.value.clone())
    }

    /// Insert or update a key, evicting the least recently used entry when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        if self.capacity == 0 {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.stats.sets += 1;

        if let Some(index) = inner.entries.get_index_of(&key) {
            if let Some((_, entry)) = inner.entries.get_index_mut(index) {
                entry.value = value;
                entry.created_at = now;
            }
            let last = inner.entries.len() - 1;
            inner.entries.move_index(index, last);
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some((evicted, _)) = inner.entries.shift_remove_index(0) {
                inner.stats.evictions += 1;
                debug!(key = %evicted, "Cache eviction");
            }
        }

        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                ttl: self.ttl,
            },
        );
        inner.stats.size = inner.entries.len();
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.shift_remove(key).is_some();
        if removed {
            inner.stats.deletes += 1;
            inner.stats.size = inner.entries.len();
        }
        removed
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.stats.size = 0;
    }

    /// Active sweep of expired entries. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.stats.expirations += removed as u64;
        inner.stats.size = inner.entries.len();
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }
}

/// Cache channel. Channels never share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheChannel {
    Keyword,
    Semantic,
    Rag,
}

impl CacheChannel {
    pub const ALL: [CacheChannel; 3] = [CacheChannel::Keyword, CacheChannel::Semantic, CacheChannel::Rag];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheChannel::Keyword => "keyword",
            CacheChannel::Semantic => "semantic",
            CacheChannel::Rag => "rag",
        }
    }
}

impl fmt::Display for CacheChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stats for every channel plus their sum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedStats {
    pub channels: Vec<(CacheChannel, CacheStats)>,
    pub total: CacheStats,
}

impl CombinedStats {
    pub fn hit_rate(&self) -> f64 {
        self.total.hit_rate()
    }
}

/// Three independent LRU+TTL caches keyed by normalized query hashes
pub struct MultiChannelCache<V> {
    keyword: TtlLruCache<V>,
    semantic: TtlLruCache<V>,
    rag: TtlLruCache<V>,
}

impl<V: Clone> MultiChannelCache<V> {
    /// Create with the same capacity and TTL for every channel
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            keyword: TtlLruCache::new(capacity, ttl),
            semantic: TtlLruCache::new(capacity, ttl),
            rag: TtlLruCache::new(capacity, ttl),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.capacity, settings.ttl_seconds.map(Duration::from_secs))
    }

    fn channel(&self, channel: CacheChannel) -> &TtlLruCache<V> {
        match channel {
            CacheChannel::Keyword => &self.keyword,
            CacheChannel::Semantic => &self.semantic,
            CacheChannel::Rag => &self.rag,
        }
    }

    /// Get a cached value for a query and its extra parameters
    pub fn get(&self, channel: CacheChannel, query: &str, params: &[(&str, String)]) -> Option<V> {
        let key = keys::cache_key(query, params);
        let value = self.channel(channel).get(&key);
        metrics::record_cache(value.is_some(), channel.as_str());
        debug!(channel = %channel, hit = value.is_some(), "Cache lookup");
        value
    }

    /// Store a value for a query and its extra parameters
    pub fn set(&self, channel: CacheChannel, query: &str, params: &[(&str, String)], value: V) {
        let key = keys::cache_key(query, params);
        self.channel(channel).set(key, value);
    }

    pub fn delete(&self, channel: CacheChannel, query: &str, params: &[(&str, String)]) -> bool {
        let key = keys::cache_key(query, params);
        self.channel(channel).delete(&key)
    }

    /// Get or load with a fallible async loader. Failed loads are not cached.
    pub async fn get_or_load<F, Fut>(
        &self,
        channel: CacheChannel,
        query: &str,
        params: &[(&str, String)],
        loader: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(cached) = self.get(channel, query, params) {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set(channel, query, params, value.clone());
        Ok(value)
    }

    pub fn clear_all(&self) {
        for channel in CacheChannel::ALL {
            self.channel(channel).clear();
        }
    }

    /// Sweep expired entries from every channel
    pub fn prune_expired(&self) -> usize {
        let removed: usize = CacheChannel::ALL
            .iter()
            .map(|c| self.channel(*c).prune_expired())
            .sum();
        if removed > 0 {
            debug!(removed, "Pruned expired cache entries");
        }
        removed
    }

    pub fn stats(&self, channel: CacheChannel) -> CacheStats {
        self.channel(channel).stats()
    }

    pub fn combined_stats(&self) -> CombinedStats {
        let mut total = CacheStats::default();
        let channels = CacheChannel::ALL
            .iter()
            .map(|c| {
                let stats = self.stats(*c);
                total.absorb(&stats);
                (*c, stats)
            })
            .collect();
        CombinedStats { channels, total }
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Lowercase, collapse whitespace, trim
    pub fn normalize_query(query: &str) -> String {
        query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Hash of the normalized query plus sorted `k=v` parameters
    pub fn cache_key(query: &str, params: &[(&str, String)]) -> String {
        let mut pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        hasher.update(b"|");
        hasher.update(pairs.join("&").as_bytes());
        hex::encode(hasher.finalize())
    }
}
