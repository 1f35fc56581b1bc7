//! Process-local TTL + LRU caches over store reads and generated content.
//!
//! Entries are a derived projection of the store: writers invalidate, they
//! never patch. Expiry is checked lazily on read and swept periodically by
//! the maintenance loop.

use crate::agent::context::MemoryContext;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::memory::ChatMessage;

use moka::Expiry;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Access bookkeeping shared by every clone of an entry.
#[derive(Debug)]
struct AccessStats {
    count: AtomicU64,
    /// Milliseconds since the entry was written.
    last_access_ms: AtomicU64,
}

#[derive(Debug, Clone)]
struct CachedValue<V> {
    value: V,
    ttl: Duration,
    written_at: Instant,
    access: Arc<AccessStats>,
}

impl<V> CachedValue<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            written_at: Instant::now(),
            access: Arc::new(AccessStats {
                count: AtomicU64::new(0),
                last_access_ms: AtomicU64::new(0),
            }),
        }
    }

    fn touch(&self) {
        self.access.count.fetch_add(1, Ordering::Relaxed);
        let elapsed = self.written_at.elapsed().as_millis() as u64;
        self.access.last_access_ms.store(elapsed, Ordering::Relaxed);
    }
}

/// Per-entry TTL: every write sets the expiry from the entry's own ttl.
struct EntryTtl;

impl<V> Expiry<String, CachedValue<V>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Entry metadata, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryInfo {
    pub ttl: Duration,
    pub age: Duration,
    pub access_count: u64,
    pub last_access: Duration,
}

/// Capacity-bounded cache with per-entry TTL and LRU eviction.
pub struct AdaptiveCache<V: Clone + Send + Sync + 'static> {
    name: &'static str,
    inner: Cache<String, CachedValue<V>>,
    default_ttl: Duration,
    max_entries: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> AdaptiveCache<V> {
    pub fn new(name: &'static str, max_entries: u64, default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .name(name)
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .build();
        Self {
            name,
            inner,
            default_ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Value for `key`, or `None` when absent or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.inner.get(key) {
            Some(entry) => {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value`; `ttl` falls back to the cache default.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.inner.insert(key.into(), CachedValue::new(value, ttl));
    }

    pub fn delete(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Presence check. Does not count as a hit or miss.
    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.inner.get(key).map(|entry| EntryInfo {
            ttl: entry.ttl,
            age: entry.written_at.elapsed(),
            access_count: entry.access.count.load(Ordering::Relaxed),
            last_access: Duration::from_millis(entry.access.last_access_ms.load(Ordering::Relaxed)),
        })
    }

    /// Cached value, or compute, store and return it. Failures are not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            self.inner.invalidate(key.as_str());
        }
        keys.len()
    }

    /// Evict expired entries now, regardless of access.
    pub fn sweep(&self) -> u64 {
        let before = self.inner.entry_count();
        self.inner.run_pending_tasks();
        let removed = before.saturating_sub(self.inner.entry_count());
        if removed > 0 {
            tracing::debug!(cache = self.name, removed, "cache sweep");
        }
        removed
    }

    /// Current entry count, after applying pending evictions.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Lowercased, whitespace-collapsed text used in cache keys.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short stable hash of arbitrary context parts.
pub fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Key for a generated reply: normalized input, context fingerprint, model tag.
pub fn response_key(text: &str, context_fingerprint: &str, model: &str) -> String {
    format!("{}|{}|{}", normalize_text(text), context_fingerprint, model)
}

/// Every cache the engine uses, constructed once and shared.
pub struct CacheRegistry {
    /// Assembled memory context, keyed `chat:author:input-hash`.
    pub context: AdaptiveCache<Arc<MemoryContext>>,
    /// Generated replies, keyed by [`response_key`].
    pub responses: AdaptiveCache<String>,
    /// Recent message windows, keyed `chat:limit`.
    pub recent: AdaptiveCache<Arc<Vec<ChatMessage>>>,
    response_ttl: Duration,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        let default_ttl = Duration::from_secs(config.default_ttl_secs);
        Self {
            context: AdaptiveCache::new("context", config.max_entries, default_ttl),
            responses: AdaptiveCache::new("responses", config.max_entries, default_ttl),
            recent: AdaptiveCache::new("recent", config.max_entries, default_ttl),
            response_ttl: Duration::from_secs(config.response_ttl_secs),
        }
    }

    pub fn response_ttl(&self) -> Duration {
        self.response_ttl
    }

    /// Drop everything derived from this chat's stored messages.
    pub fn invalidate_chat(&self, chat_id: &str) -> usize {
        let prefix = format!("{chat_id}:");
        let dropped = self.context.invalidate_prefix(&prefix) + self.recent.invalidate_prefix(&prefix);
        tracing::trace!(chat_id, dropped, "invalidated chat caches");
        dropped
    }

    pub fn sweep_all(&self) -> u64 {
        self.context.sweep() + self.responses.sweep() + self.recent.sweep()
    }
}
