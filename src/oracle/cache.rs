//! Price cache - latest aggregate per (symbol, chain) with lazy TTL eviction
//!
//! Keys live in a sharded map, so different keys never contend and writes to
//! one key are serialized by its shard lock. A write whose sequence is older
//! than the cached entry is rejected: recency wins, not arrival order.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::types::{normalize_symbol, AggregatedPrice, ChainId};

pub type CacheKey = (String, Option<ChainId>);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub price: AggregatedPrice,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    /// A newer aggregate is already cached
    RejectedOlder,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub rejected_writes: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct PriceCache {
    entries: DashMap<CacheKey, CacheEntry>,
    default_ttl: Duration,
    /// How long past expiry an entry is kept for degraded serving
    stale_grace: Duration,
    pub stats: CacheStats,
}

impl PriceCache {
    pub fn new(default_ttl: Duration, stale_grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            stale_grace,
            stats: CacheStats::default(),
        }
    }

    fn key(symbol: &str, chain: Option<ChainId>) -> CacheKey {
        (normalize_symbol(symbol), chain)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh entry or miss; entries past their stale grace are evicted here
    pub fn get(&self, symbol: &str, chain: Option<ChainId>) -> Option<AggregatedPrice> {
        let key = Self::key(symbol, chain);
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired(now) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.price.clone());
            }
        }

        self.evict_if_dead(&key, now);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Expired-but-within-grace entry for degraded serving
    pub fn get_stale(&self, symbol: &str, chain: Option<ChainId>) -> Option<AggregatedPrice> {
        let key = Self::key(symbol, chain);
        let now = Instant::now();
        let entry = self.entries.get(&key)?;
        if now < entry.expires_at + self.stale_grace {
            Some(entry.price.clone())
        } else {
            None
        }
    }

    /// Remaining lifetime of a fresh entry
    pub fn ttl_remaining(&self, symbol: &str, chain: Option<ChainId>) -> Option<Duration> {
        let key = Self::key(symbol, chain);
        let entry = self.entries.get(&key)?;
        entry.expires_at.checked_duration_since(Instant::now())
    }

    pub fn put(&self, price: AggregatedPrice) -> PutOutcome {
        self.put_with_ttl(price, self.default_ttl)
    }

    pub fn put_with_ttl(&self, price: AggregatedPrice, ttl: Duration) -> PutOutcome {
        let key = Self::key(&price.symbol, price.chain_id);
        let expires_at = Instant::now() + ttl;

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let cached_seq = occupied.get().price.sequence;
                if price.sequence < cached_seq {
                    self.stats.rejected_writes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        symbol = %price.symbol,
                        chain = ?price.chain_id,
                        incoming = price.sequence,
                        cached = cached_seq,
                        "Rejected out-of-order cache write"
                    );
                    return PutOutcome::RejectedOlder;
                }
                occupied.insert(CacheEntry { price, expires_at });
                PutOutcome::Replaced
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry { price, expires_at });
                PutOutcome::Inserted
            }
        }
    }

    pub fn invalidate(&self, symbol: &str, chain: Option<ChainId>) -> bool {
        self.entries.remove(&Self::key(symbol, chain)).is_some()
    }

    /// Fresh entries for the arbitrage scanner and status views
    pub fn fresh_entries(&self) -> Vec<AggregatedPrice> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.value().price.clone())
            .collect()
    }

    /// Drop everything past its stale grace
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        let grace = self.stale_grace;
        self.entries.retain(|_, e| now < e.expires_at + grace);
        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_dead(&self, key: &CacheKey, now: Instant) {
        let grace = self.stale_grace;
        if self
            .entries
            .remove_if(key, |_, e| now >= e.expires_at + grace)
            .is_some()
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::test_support::aggregate;
    use rust_decimal_macros::dec;

    #[test]
    fn test_put_then_get() {
        let cache = PriceCache::default();
        assert_eq!(cache.put(aggregate("ETH", None, dec!(2000), 1)), PutOutcome::Inserted);

        let got = cache.get("eth", None).unwrap();
        assert_eq!(got.price, dec!(2000));
        assert!(cache.get("ETH", Some(ChainId(1))).is_none());
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_older_write_does_not_overwrite_newer() {
        let cache = PriceCache::default();
        cache.put(aggregate("ETH", None, dec!(2020), 20));

        let outcome = cache.put(aggregate("ETH", None, dec!(2010), 10));
        assert_eq!(outcome, PutOutcome::RejectedOlder);
        assert_eq!(cache.get("ETH", None).unwrap().sequence, 20);
        assert_eq!(cache.stats.rejected_writes.load(Ordering::Relaxed), 1);

        assert_eq!(cache.put(aggregate("ETH", None, dec!(2030), 30)), PutOutcome::Replaced);
        assert_eq!(cache.get("ETH", None).unwrap().price, dec!(2030));
    }

    #[test]
    fn test_expired_entry_is_a_miss_but_served_stale() {
        let cache = PriceCache::new(Duration::from_secs(30), Duration::from_secs(60));
        cache.put_with_ttl(aggregate("ETH", None, dec!(2000), 1), Duration::ZERO);

        assert!(cache.get("ETH", None).is_none());
        assert_eq!(cache.get_stale("ETH", None).unwrap().price, dec!(2000));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dead_entry_evicted_at_read() {
        let cache = PriceCache::new(Duration::from_secs(30), Duration::ZERO);
        cache.put_with_ttl(aggregate("ETH", None, dec!(2000), 1), Duration::ZERO);

        assert!(cache.get("ETH", None).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats.evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_invalidate_and_ttl() {
        let cache = PriceCache::default();
        cache.put(aggregate("ETH", Some(ChainId(10)), dec!(2000), 1));

        let remaining = cache.ttl_remaining("ETH", Some(ChainId(10))).unwrap();
        assert!(remaining > Duration::from_secs(25) && remaining <= Duration::from_secs(30));

        assert!(cache.invalidate("ETH", Some(ChainId(10))));
        assert!(!cache.invalidate("ETH", Some(ChainId(10))));
        assert!(cache.get("ETH", Some(ChainId(10))).is_none());
    }

    #[test]
    fn test_fresh_entries_and_purge() {
        let cache = PriceCache::new(Duration::from_secs(30), Duration::ZERO);
        cache.put(aggregate("ETH", Some(ChainId(1)), dec!(2000), 1));
        cache.put_with_ttl(aggregate("BTC", None, dec!(50000), 2), Duration::ZERO);

        assert_eq!(cache.fresh_entries().len(), 1);
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 1);
    }
}
