// Interception counters — per-outcome totals and cache hit rate.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_fetches: u64,
    pub stored: u64,
    pub store_failures: u64,
    pub uncached: u64,
    pub unresolved: u64,
    pub bypassed: u64,
    pub served_bytes: u64,
    pub cache_hit_rate: f64,
}

#[derive(Default)]
pub struct StatsCollector {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream_fetches: AtomicU64,
    stored: AtomicU64,
    store_failures: AtomicU64,
    uncached: AtomicU64,
    unresolved: AtomicU64,
    bypassed: AtomicU64,
    served_bytes: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_uncached(&self) {
        self.uncached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_served(&self, bytes: u64) {
        self.served_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn upstream_fetches(&self) -> u64 {
        self.upstream_fetches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        let cache_hit_rate = if lookups > 0 {
            cache_hits as f64 / lookups as f64
        } else {
            0.0
        };

        StatsSnapshot {
            cache_hits,
            cache_misses,
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            uncached: self.uncached.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            served_bytes: self.served_bytes.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StatsCollector::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_miss();
        stats.record_fetch();
        stats.record_stored();
        stats.record_bypass();
        stats.record_served(1500);
        assert_eq!(stats.upstream_fetches(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 3);
        assert_eq!(snap.stored, 1);
        assert_eq!(snap.bypassed, 1);
        assert_eq!(snap.served_bytes, 1500);
        assert!((snap.cache_hit_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_zero_without_lookups() {
        let snap = StatsCollector::new().snapshot();
        assert_eq!(snap.cache_hit_rate, 0.0);
        assert_eq!(snap, StatsSnapshot::default());
    }
}
