use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// In-process result cache with a fixed time-to-live.
///
/// Entries are keyed by operation name plus the request parameters, sorted
/// by parameter name so that argument order never produces a second entry.
/// Expired entries read as misses and are only dropped by [`TtlCache::cleanup`].
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_seconds: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// `operation:k1=v1&k2=v2`, params sorted by key
    pub fn compose_key(operation: &str, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let query = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}:{}", operation, query)
    }

    /// Storage key; URLs can be long so the composite key is digested.
    fn generate_key(operation: &str, params: &[(&str, &str)]) -> String {
        let composite = Self::compose_key(operation, params);
        let hash = blake3::hash(composite.as_bytes());
        format!("{}:{}", operation, hash.to_hex())
    }

    pub fn get(&self, operation: &str, params: &[(&str, &str)]) -> Option<V> {
        let key = Self::generate_key(operation, params);

        let found = self
            .entries
            .get(&key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone());

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit for {}", operation);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, operation: &str, params: &[(&str, &str)], value: V) {
        let key = Self::generate_key(operation, params);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            tracing::debug!("Removed {} expired cache entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_order_independent() {
        let a = TtlCache::<String>::compose_key("op", &[("url", "u"), ("mobile", "false")]);
        let b = TtlCache::<String>::compose_key("op", &[("mobile", "false"), ("url", "u")]);
        assert_eq!(a, b);
        assert_eq!(a, "op:mobile=false&url=u");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(300));
        let params = [("url", "https://youtu.be/dQw4w9WgXcQ")];

        cache.insert("social_extract", &params, "payload".to_string());
        assert_eq!(cache.get("social_extract", &params).as_deref(), Some("payload"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("social_extract", &params).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("social_extract", &params).is_none());

        assert_eq!(cache.cleanup(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_hits_and_misses() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("op", &[("k", "v")], 1u32);

        assert_eq!(cache.get("op", &[("k", "v")]), Some(1));
        assert_eq!(cache.get("op", &[("k", "other")]), None);
        assert_eq!(cache.get("other", &[("k", "v")]), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }
}
