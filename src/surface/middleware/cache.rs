//! Response cache
//!
//! Strict read-through LRU with TTL. Keys are `(tool, normalized params)`
//! where normalization writes object keys in sorted order recursively, so
//! permutations of the same parameter set share one entry. Mutating tools
//! never touch this cache; invalidation is programmatic only.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

struct CachedEntry {
    value: Value,
    inserted: Instant,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Canonical cache key for a tool call.
    pub fn key(tool: &str, params: &Value) -> String {
        let mut normalized = String::new();
        write_canonical(&mut normalized, params);
        format!("{}:{}", tool, normalized)
    }

    /// Fresh hit or nothing. Expired entries are evicted on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: String, value: Value) {
        self.entries.lock().put(
            key,
            CachedEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop one exact entry, or every entry of a tool when `params` is
    /// `None`.
    pub fn invalidate(&self, tool: &str, params: Option<&Value>) {
        let mut entries = self.entries.lock();
        match params {
            Some(params) => {
                entries.pop(&Self::key(tool, params));
            }
            None => {
                let prefix = format!("{}:", tool);
                let doomed: Vec<String> = entries
                    .iter()
                    .map(|(k, _)| k.clone())
                    .filter(|k| k.starts_with(&prefix))
                    .collect();
                for key in doomed {
                    entries.pop(&key);
                }
            }
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Deterministic JSON rendering: object keys sorted, arrays in order.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(out, &map[*key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_stable_under_key_order_permutation() {
        let a = json!({"limit": 10, "directory": "notes", "tag": "x"});
        let b = json!({"tag": "x", "limit": 10, "directory": "notes"});
        assert_eq!(
            ResponseCache::key("query_files", &a),
            ResponseCache::key("query_files", &b)
        );
    }

    #[test]
    fn key_distinguishes_values_and_tools() {
        let a = json!({"limit": 10});
        let b = json!({"limit": 11});
        assert_ne!(
            ResponseCache::key("query_files", &a),
            ResponseCache::key("query_files", &b)
        );
        assert_ne!(
            ResponseCache::key("query_files", &a),
            ResponseCache::key("search_tags", &a)
        );
    }

    #[test]
    fn nested_objects_normalize_recursively() {
        let a = json!({"filter": {"b": 1, "a": 2}});
        let b = json!({"filter": {"a": 2, "b": 1}});
        assert_eq!(ResponseCache::key("t", &a), ResponseCache::key("t", &b));
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = ResponseCache::new(10, Duration::from_millis(30));
        cache.put("k".into(), json!(1));
        assert_eq!(cache.get("k"), Some(json!(1)));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn lru_evicts_least_recent_above_capacity() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), json!(1));
        cache.put("b".into(), json!(2));
        cache.get("a");
        cache.put("c".into(), json!(3));

        assert!(cache.get("a").is_some(), "recently used survives");
        assert!(cache.get("b").is_none(), "least recent evicted");
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn invalidate_exact_and_by_tool() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let p1 = json!({"a": 1});
        let p2 = json!({"a": 2});
        cache.put(ResponseCache::key("t", &p1), json!("one"));
        cache.put(ResponseCache::key("t", &p2), json!("two"));
        cache.put(ResponseCache::key("other", &p1), json!("keep"));

        cache.invalidate("t", Some(&p1));
        assert!(cache.get(&ResponseCache::key("t", &p1)).is_none());
        assert!(cache.get(&ResponseCache::key("t", &p2)).is_some());

        cache.invalidate("t", None);
        assert!(cache.get(&ResponseCache::key("t", &p2)).is_none());
        assert!(cache.get(&ResponseCache::key("other", &p1)).is_some());
    }
}
