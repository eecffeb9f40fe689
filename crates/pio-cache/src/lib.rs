//! Keyed, tag-grouped memoization with TTL and bulk eviction, plus a
//! rate-limit/debounce primitive. See spec.md §4.2.
//!
//! Cache is advisory: a miss must never produce a different answer than a
//! hit, so every read path must remain correct with the cache disabled.

use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Thread-safe, tag-grouped cache fronting expensive reads.
pub struct Cache {
    entries: DashMap<String, Entry>,
    /// tag -> set of keys tagged with it, for bulk eviction.
    tag_index: DashMap<String, HashSet<String>>,
    /// debounce bookkeeping: name -> last-call instant.
    debounce_log: DashMap<String, Instant>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            tag_index: DashMap::new(),
            debounce_log: DashMap::new(),
        }
    }

    /// Fetch a cached value, `None` on miss or expiry.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert a value with an optional TTL (`None` = never expires on its own).
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) {
        self.set_tagged(key, value, ttl, &[]);
    }

    /// Insert a value under one or more tags, for later bulk eviction.
    pub fn set_tagged(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
        tags: &[&str],
    ) {
        let key = key.into();
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(key.clone(), Entry { value, expires_at });
        for tag in tags {
            self.tag_index
                .entry(tag.to_string())
                .or_default()
                .insert(key.clone());
        }
    }

    /// Run `f` and cache its result under `key`/`tag` for `ttl`, or return the
    /// cached value on a hit.
    pub async fn memoize<F, Fut>(
        &self,
        key: &str,
        tag: &str,
        ttl: Duration,
        f: F,
    ) -> serde_json::Value
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = serde_json::Value>,
    {
        if let Some(hit) = self.get(key) {
            return hit;
        }
        let value = f().await;
        self.set_tagged(key, value.clone(), Some(ttl), &[tag]);
        value
    }

    /// Remove every entry tagged with `tag`.
    pub fn evict_tag(&self, tag: &str) {
        if let Some((_, keys)) = self.tag_index.remove(tag) {
            for key in keys {
                self.entries.remove(&key);
            }
        }
    }

    /// Returns `true` if `name` was already debounced within `window` (i.e.
    /// this call should be rejected as too-soon); records this call's time
    /// either way.
    pub fn debounce(&self, name: &str, window: Duration) -> bool {
        let now = Instant::now();
        let mut hit = false;
        self.debounce_log
            .entry(name.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) < window {
                    hit = true;
                }
                *last = now;
            })
            .or_insert(now);
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = Cache::new();
        assert!(cache.get("k").is_none());
        cache.set("k", serde_json::json!(1), None);
        assert_eq!(cache.get("k"), Some(serde_json::json!(1)));
    }

    #[test]
    fn expiry() {
        let cache = Cache::new();
        cache.set("k", serde_json::json!(1), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn evict_tag_removes_all_tagged_entries() {
        let cache = Cache::new();
        cache.set_tagged("a", serde_json::json!(1), None, &["experiments"]);
        cache.set_tagged("b", serde_json::json!(2), None, &["experiments"]);
        cache.set_tagged("c", serde_json::json!(3), None, &["config"]);
        cache.evict_tag("experiments");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("c"), Some(serde_json::json!(3)));
    }

    #[test]
    fn debounce_rejects_rapid_repeat_calls() {
        let cache = Cache::new();
        assert!(!cache.debounce("run:stirring", Duration::from_secs(1)));
        assert!(cache.debounce("run:stirring", Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn memoize_only_calls_f_once_per_ttl() {
        let cache = Cache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .memoize("k", "experiments", Duration::from_secs(60), || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    serde_json::json!("v")
                })
                .await;
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
