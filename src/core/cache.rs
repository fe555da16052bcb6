//! Generic TTL cache with size-bounded eviction, tag invalidation and
//! pattern lookup.
//!
//! Eviction under pressure removes the entry with the oldest write
//! timestamp. Reads do not refresh that timestamp, so this approximates LRU by
//! insertion/refresh order rather than by last access.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, Weak},
    time::{Duration, Instant},
};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tokio::task::JoinHandle;

/// Per-entry options accepted by [`Cache::set`].
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Overrides the cache's default TTL.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub metadata: Option<Value>,
}

impl CacheOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    timestamp: Instant,
    /// Tie-breaker for entries written within the same clock tick.
    write_seq: u64,
    ttl: Duration,
    tags: HashSet<String>,
    metadata: Option<Value>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.timestamp) > self.ttl
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    next_seq: u64,
}

impl<V> CacheInner<V> {
    /// Drop `key` if it has expired, counting a miss and an eviction.
    fn purge_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now));
        if expired {
            self.entries.remove(key);
            self.misses += 1;
            self.evictions += 1;
        }
        expired
    }
}

/// In-memory TTL cache. Share it behind an `Arc`.
pub struct Cache<V> {
    inner: Mutex<CacheInner<V>>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V: Clone> Cache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                next_seq: 0,
            }),
            max_size,
            default_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.purge_if_expired(key, now) {
            return None;
        }
        match inner.entries.get(key).map(|entry| entry.value.clone()) {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Metadata stored alongside a live entry.
    pub fn metadata(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.purge_if_expired(key, now) {
            return None;
        }
        inner.entries.get(key).and_then(|entry| entry.metadata.clone())
    }

    /// Insert or replace `key`. A new key arriving at capacity evicts the
    /// entry with the oldest timestamp first.
    pub fn set(&self, key: impl Into<String>, value: V, options: CacheOptions) {
        if self.max_size == 0 {
            return;
        }
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.timestamp, entry.write_seq))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.evictions += 1;
                tracing::debug!(key = %oldest, "Cache evicted oldest entry");
            }
        }

        inner.next_seq += 1;
        let entry = CacheEntry {
            value,
            timestamp: now,
            write_seq: inner.next_seq,
            ttl: options.ttl.unwrap_or(self.default_ttl),
            tags: options.tags.into_iter().collect(),
            metadata: options.metadata,
        };
        inner.entries.insert(key, entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.purge_if_expired(key, now) {
            return false;
        }
        inner.entries.contains_key(key)
    }

    /// Remove every entry carrying `tag`; returns how many were removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.tags.contains(tag));
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(tag = %tag, removed, "Cache entries invalidated by tag");
        }
        removed
    }

    /// Live entries whose key matches `pattern`, sorted by key.
    pub fn get_by_pattern(&self, pattern: &Regex) -> Vec<(String, V)> {
        let now = Instant::now();
        let mut inner = self.lock();
        let matching: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();

        let mut found = Vec::new();
        for key in matching {
            if inner.purge_if_expired(&key, now) {
                continue;
            }
            if let Some(entry) = inner.entries.get(&key) {
                found.push((key.clone(), entry.value.clone()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Remove all expired entries, counting each as an eviction.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.evictions += removed as u64;
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> CacheStats {
        let inner = self.lock();
        let requests = inner.hits + inner.misses;
        let hit_rate = if requests == 0 {
            0.0
        } else {
            inner.hits as f64 / requests as f64
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            hit_rate,
        }
    }
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Run [`Cache::sweep_expired`] every `interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    tracing::debug!("Cache dropped; sweeper exiting");
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Cache sweep removed expired entries");
                }
            }
        })
    }
}

impl<V> Cache<V> {
    /// Deterministic key for a request: identical method and structurally
    /// identical params produce the same key regardless of object key order.
    pub fn key_for(method: &str, params: &Value) -> String {
        let mut canonical = String::new();
        write_canonical(params, &mut canonical);
        let digest = Sha1::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        format!("{method}:{hex}")
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(*key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use serde_json::json;

    use super::*;

    fn cache(max_size: usize) -> Cache<String> {
        Cache::new(max_size, Duration::from_secs(60))
    }

    #[test]
    fn test_get_set_and_stats() {
        let cache = cache(10);
        assert!(cache.get("k").is_none());
        cache.set("k", "v".to_string(), CacheOptions::default());
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_zero_without_requests() {
        assert_eq!(cache(1).get_stats().hit_rate, 0.0);
    }

    #[test]
    fn test_ttl_expiry_counts_miss_and_eviction() {
        let cache = cache(10);
        cache.set("k", "v".to_string(), CacheOptions::ttl(Duration::from_millis(100)));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        let before = cache.get_stats();

        sleep(Duration::from_millis(150));
        assert!(cache.get("k").is_none());

        let after = cache.get_stats();
        assert_eq!(after.misses, before.misses + 1);
        assert_eq!(after.evictions, before.evictions + 1);
        assert_eq!(after.entries, 0);
    }

    #[test]
    fn test_has_purges_expired() {
        let cache = cache(10);
        cache.set("k", "v".to_string(), CacheOptions::ttl(Duration::from_millis(20)));
        assert!(cache.has("k"));
        sleep(Duration::from_millis(40));
        assert!(!cache.has("k"));
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_eviction_removes_oldest_timestamp() {
        let cache = cache(3);
        cache.set("a", "1".to_string(), CacheOptions::default());
        cache.set("b", "2".to_string(), CacheOptions::default());
        cache.set("c", "3".to_string(), CacheOptions::default());
        // Reading does not refresh the timestamp.
        assert!(cache.get("a").is_some());

        cache.set("d", "4".to_string(), CacheOptions::default());
        assert_eq!(cache.len(), 3);
        assert!(!cache.has("a"));
        assert!(cache.has("b") && cache.has("c") && cache.has("d"));
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(2);
        cache.set("a", "1".to_string(), CacheOptions::default());
        cache.set("b", "2".to_string(), CacheOptions::default());
        cache.set("a", "1b".to_string(), CacheOptions::default());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_stats().evictions, 0);

        // "a" was refreshed, so "b" is now the oldest.
        cache.set("c", "3".to_string(), CacheOptions::default());
        assert!(!cache.has("b"));
        assert_eq!(cache.get("a").as_deref(), Some("1b"));
    }

    #[test]
    fn test_invalidate_by_tag() {
        let cache = cache(10);
        cache.set("x", "1".to_string(), CacheOptions::default().with_tag("slateA"));
        cache.set(
            "y",
            "2".to_string(),
            CacheOptions::default().with_tag("slateA").with_tag("nba"),
        );
        cache.set("z", "3".to_string(), CacheOptions::default().with_tag("slateB"));

        assert_eq!(cache.invalidate_by_tag("slateA"), 2);
        assert!(!cache.has("x") && !cache.has("y"));
        assert!(cache.has("z"));
        assert_eq!(cache.invalidate_by_tag("slateA"), 0);
    }

    #[test]
    fn test_get_by_pattern() {
        let cache = cache(10);
        cache.set("tools/call:abc", "1".to_string(), CacheOptions::default());
        cache.set("tools/call:def", "2".to_string(), CacheOptions::default());
        cache.set("tools/list:xyz", "3".to_string(), CacheOptions::default());

        let pattern = Regex::new("^tools/call:").unwrap();
        let found = cache.get_by_pattern(&pattern);
        assert_eq!(
            found,
            vec![
                ("tools/call:abc".to_string(), "1".to_string()),
                ("tools/call:def".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_sweep_expired() {
        let cache = cache(10);
        cache.set("short", "1".to_string(), CacheOptions::ttl(Duration::from_millis(10)));
        cache.set("long", "2".to_string(), CacheOptions::default());
        sleep(Duration::from_millis(30));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_metadata_and_delete() {
        let cache = cache(10);
        cache.set(
            "k",
            "v".to_string(),
            CacheOptions::default().with_metadata(json!({ "server": "core" })),
        );
        assert_eq!(cache.metadata("k"), Some(json!({ "server": "core" })));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_for_ignores_field_order() {
        let a = json!({ "name": "app.echo", "arguments": { "x": 1, "y": [1, { "b": 2, "a": 1 }] } });
        let b = json!({ "arguments": { "y": [1, { "a": 1, "b": 2 }], "x": 1 }, "name": "app.echo" });
        assert_eq!(
            Cache::<()>::key_for("tools/call", &a),
            Cache::<()>::key_for("tools/call", &b)
        );

        let c = json!({ "name": "app.echo", "arguments": { "x": 2 } });
        assert_ne!(
            Cache::<()>::key_for("tools/call", &a),
            Cache::<()>::key_for("tools/call", &c)
        );
        assert_ne!(
            Cache::<()>::key_for("tools/call", &a),
            Cache::<()>::key_for("tools/list", &a)
        );
        assert!(Cache::<()>::key_for("tools/call", &a).starts_with("tools/call:"));
    }

    #[tokio::test]
    async fn test_background_sweeper_removes_expired() {
        let cache = Arc::new(cache(10));
        cache.set("k", "v".to_string(), CacheOptions::ttl(Duration::from_millis(10)));
        let handle = cache.spawn_sweeper(Duration::from_millis(25));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);
        handle.abort();
    }
}
