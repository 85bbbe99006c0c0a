//! Bounded LRU response cache with TTL, used as the lowest-tier fallback for
//! AI-backed calls.
//!
//! Recency is tracked with a lazily-invalidated insertion-order queue: every
//! touch pushes a fresh (seq, key) marker and stamps the entry with the same
//! seq; eviction pops markers until one matches its entry's current stamp.
//! Both get and put stay O(1) amortized.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 500;
pub const DEFAULT_TTL_SECS: u64 = 3_600;

/// Hashing covers at most this many characters of the input.
const KEY_PREFIX_CHARS: usize = 500;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

struct Entry {
    value: Value,
    expires_at: Instant,
    seq: u64,
}

struct Inner {
    map: HashMap<String, Entry>,
    order: VecDeque<(u64, String)>,
    seq: u64,
    hits: u64,
    misses: u64,
}

pub struct ResponseCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                seq: 0,
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Cache key: function name plus a fast non-cryptographic hash (FNV-1a)
    /// of the first 500 characters of the input.
    pub fn key(fn_name: &str, input: &str) -> String {
        let prefix: String = input.chars().take(KEY_PREFIX_CHARS).collect();
        format!("{}:{:016x}", fn_name, fnv1a(prefix.as_bytes()))
    }

    /// Look up a live entry. Expired entries are deleted and count as a miss;
    /// a hit refreshes the entry's recency.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        let expired = matches!(inner.map.get(key), Some(e) if e.expires_at <= now);
        if expired {
            inner.map.remove(key);
            inner.misses += 1;
            return None;
        }

        inner.seq += 1;
        let seq = inner.seq;
        let inner = &mut *inner;
        match inner.map.get_mut(key) {
            Some(entry) => {
                entry.seq = seq;
                inner.order.push_back((seq, key.to_string()));
                inner.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a value, evicting the least-recently-touched entry at capacity.
    pub fn put(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.seq += 1;
        let seq = inner.seq;

        if !inner.map.contains_key(key) && inner.map.len() >= self.capacity {
            Self::evict_oldest(&mut inner);
        }

        inner.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
                seq,
            },
        );
        inner.order.push_back((seq, key.to_string()));
    }

    fn evict_oldest(inner: &mut Inner) {
        while let Some((seq, key)) = inner.order.pop_front() {
            let current = match inner.map.get(&key) {
                Some(entry) => entry.seq,
                None => continue, // stale marker for a removed entry
            };
            if current == seq {
                inner.map.remove(&key);
                return;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            size: inner.map.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(capacity: usize) -> ResponseCache {
        ResponseCache::new(capacity, Duration::from_secs(60))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let c = cache(10);
        c.put("k1", json!({"answer": 42}));
        assert_eq!(c.get("k1"), Some(json!({"answer": 42})));
        assert_eq!(c.get("k2"), None);
    }

    #[test]
    fn test_key_is_stable_and_prefix_bounded() {
        let short = ResponseCache::key("analyze", "hello");
        assert_eq!(short, ResponseCache::key("analyze", "hello"));
        assert_ne!(short, ResponseCache::key("detect", "hello"));

        // Inputs identical in the first 500 chars share a key.
        let base = "x".repeat(500);
        let a = format!("{base}AAA");
        let b = format!("{base}BBB");
        assert_eq!(
            ResponseCache::key("analyze", &a),
            ResponseCache::key("analyze", &b)
        );
    }

    #[test]
    fn test_eviction_drops_oldest_by_insertion() {
        let c = cache(2);
        c.put("a", json!(1));
        c.put("b", json!(2));
        c.put("c", json!(3)); // evicts "a"
        assert_eq!(c.get("a"), None);
        assert_eq!(c.get("b"), Some(json!(2)));
        assert_eq!(c.get("c"), Some(json!(3)));
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let c = cache(2);
        c.put("a", json!(1));
        c.put("b", json!(2));
        // Touch the oldest key, then insert: the second-oldest goes.
        assert!(c.get("a").is_some());
        c.put("c", json!(3)); // evicts "b", not "a"
        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(json!(1)));
        assert_eq!(c.get("c"), Some(json!(3)));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let c = cache(2);
        c.put("a", json!(1));
        c.put("b", json!(2));
        c.put("a", json!(10)); // same key, no eviction
        assert_eq!(c.get("a"), Some(json!(10)));
        assert_eq!(c.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_expired_entry_counts_as_miss() {
        let c = ResponseCache::new(10, Duration::from_millis(5));
        c.put("k", json!(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.get("k"), None);
        let stats = c.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_stats_counters() {
        let c = cache(10);
        c.put("k", json!(1));
        c.get("k");
        c.get("k");
        c.get("absent");
        let stats = c.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 10);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let c = cache(3);
        for i in 0..50 {
            c.put(&format!("k{i}"), json!(i));
            assert!(c.len() <= 3);
        }
    }
}
