//! TTL response cache for providers
//!
//! Keyed by operation plus arguments so a hit short-circuits the network call.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{Candle, Operation, OrderBook, PriceData, TokenInfo};

#[derive(Debug, Clone)]
pub enum CachedValue {
    Price(PriceData),
    OrderBook(OrderBook),
    Candles(Vec<Candle>),
    Tokens(Vec<TokenInfo>),
}

#[derive(Clone)]
struct CachedResponse {
    value: CachedValue,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedResponse {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, 4_096)
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(op: Operation, args: &[&str]) -> String {
        let mut key = op.as_str().to_string();
        for arg in args {
            key.push(':');
            key.push_str(arg);
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<CachedValue> {
        if self.ttl.is_zero() {
            return None;
        }
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            // Entry expired, remove it
            drop(entry);
            self.entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, value: CachedValue) {
        if self.ttl.is_zero() {
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                // Still full: drop ~10% of entries
                let to_remove = (self.max_entries / 10).max(1);
                let keys: Vec<_> = self
                    .entries
                    .iter()
                    .take(to_remove)
                    .map(|r| r.key().clone())
                    .collect();
                for key in keys {
                    self.entries.remove(&key);
                }
            }
        }

        self.entries.insert(
            key,
            CachedResponse {
                value,
                cached_at: Instant::now(),
                ttl: self.ttl,
            },
        );
    }

    pub fn purge_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::provider::{Capabilities, MarketDataProvider, ProviderRegistry};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn price(value: f64) -> CachedValue {
        CachedValue::Price(PriceData {
            token: "mint".into(),
            value,
            timestamp: Utc::now(),
            source: "test".into(),
        })
    }

    #[test]
    fn test_key_includes_arguments() {
        assert_eq!(
            ResponseCache::key(Operation::OrderBook, &["mint", "20"]),
            "get_order_book:mint:20"
        );
        assert_ne!(
            ResponseCache::key(Operation::Price, &["a"]),
            ResponseCache::key(Operation::Search, &["a"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(10));
        let key = ResponseCache::key(Operation::Price, &["mint"]);
        cache.insert(key.clone(), price(1.5));

        assert!(matches!(cache.get(&key), Some(CachedValue::Price(p)) if p.value == 1.5));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = ResponseCache::new(Duration::ZERO);
        cache.insert("k".into(), price(1.0));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_eviction_keeps_cache_bounded() {
        let cache = ResponseCache::with_capacity(Duration::from_secs(60), 10);
        for i in 0..25 {
            cache.insert(format!("k{}", i), price(i as f64));
        }
        assert!(cache.len() <= 10);
    }

    /// Caches prices the way the HTTP providers do and counts upstream fetches
    struct CachingFeed {
        cache: ResponseCache,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for CachingFeed {
        fn name(&self) -> &str {
            "caching-feed"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                price: true,
                ..Default::default()
            }
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn get_price(&self, token: &str) -> Result<PriceData> {
            let key = ResponseCache::key(Operation::Price, &[token]);
            if let Some(CachedValue::Price(price)) = self.cache.get(&key) {
                return Ok(price);
            }
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            let price = PriceData {
                token: token.to_string(),
                value: n as f64,
                timestamp: Utc::now(),
                source: "caching-feed".into(),
            };
            self.cache.insert(key, CachedValue::Price(price.clone()));
            Ok(price)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_price_hit_skips_upstream() {
        let feed = Arc::new(CachingFeed {
            cache: ResponseCache::new(Duration::from_secs(10)),
            fetches: AtomicUsize::new(0),
        });
        let registry = ProviderRegistry::new();
        registry
            .register_external(feed.clone(), 100, Duration::from_secs(5))
            .await
            .unwrap();

        let first = registry.get_price("mint").await.unwrap();
        let second = registry.get_price("mint").await.unwrap();
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.value, second.value);

        // Other arguments miss
        registry.get_price("other").await.unwrap();
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        let refreshed = registry.get_price("mint").await.unwrap();
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(refreshed.value, 3.0);
    }
}
