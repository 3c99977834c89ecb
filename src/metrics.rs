//! Cache Metrics
//!
//! Every keyed cache counts what it does with lock-free counters and reports
//! them as a `BTreeMap<String, f64>`. BTreeMap keeps the key order
//! deterministic, so reports from different caches and runs line up when
//! printed or exported.
//!
//! | Metric | Counted when |
//! |--------|--------------|
//! | `requests` | `get` is called |
//! | `cache_hits` | `get` is answered from a fresh value without fetching |
//! | `fetches` | the underlying fetch runs |
//! | `fetch_failures` | the underlying fetch returns an error |
//! | `stale_served` | a failed refetch is answered with the previous value |
//! | `retries_suppressed` | the retry policy refuses an attempt |
//! | `inserts` | a value is inserted out of band |
//! | `purges` | a key is purged (including each key cleared by `purge_all`) |
//! | `expirations` | a key is expired through `expire` |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Uniform metrics reporting for caches and groups of caches.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name of the reporting cache.
    fn cache_name(&self) -> &str;
}

/// Counters for one keyed cache.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    stale_served: AtomicU64,
    retries_suppressed: AtomicU64,
    inserts: AtomicU64,
    purges: AtomicU64,
    expirations: AtomicU64,
}

/// A point-in-time copy of [`FetchMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchMetricsSnapshot {
    /// Calls to `get`.
    pub requests: u64,
    /// Calls answered from a fresh value.
    pub cache_hits: u64,
    /// Fetches that ran.
    pub fetches: u64,
    /// Fetches that failed.
    pub fetch_failures: u64,
    /// Failed refetches answered with the previous value.
    pub stale_served: u64,
    /// Calls refused by the retry policy.
    pub retries_suppressed: u64,
    /// Out-of-band inserts.
    pub inserts: u64,
    /// Keys purged.
    pub purges: u64,
    /// Keys expired individually.
    pub expirations: u64,
}

macro_rules! counters {
    ($($record:ident => $field:ident),* $(,)?) => {
        impl FetchMetrics {
            $(
                #[inline]
                pub(crate) fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counters! {
    record_request => requests,
    record_hit => cache_hits,
    record_fetch => fetches,
    record_fetch_failure => fetch_failures,
    record_stale_served => stale_served,
    record_retry_suppressed => retries_suppressed,
    record_insert => inserts,
    record_expiration => expirations,
}

impl FetchMetrics {
    pub(crate) fn record_purges(&self, count: usize) {
        self.purges.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> FetchMetricsSnapshot {
        FetchMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            retries_suppressed: self.retries_suppressed.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl FetchMetricsSnapshot {
    /// Adds `other`'s counters to this snapshot.
    pub fn merge(&mut self, other: &FetchMetricsSnapshot) {
        self.requests += other.requests;
        self.cache_hits += other.cache_hits;
        self.fetches += other.fetches;
        self.fetch_failures += other.fetch_failures;
        self.stale_served += other.stale_served;
        self.retries_suppressed += other.retries_suppressed;
        self.inserts += other.inserts;
        self.purges += other.purges;
        self.expirations += other.expirations;
    }

    /// Share of requests answered without fetching, between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.cache_hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Share of fetches that failed, between 0.0 and 1.0.
    pub fn failure_rate(&self) -> f64 {
        if self.fetches > 0 {
            self.fetch_failures as f64 / self.fetches as f64
        } else {
            0.0
        }
    }

    /// Converts the snapshot to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert("expirations".to_string(), self.expirations as f64);
        metrics.insert("fetch_failures".to_string(), self.fetch_failures as f64);
        metrics.insert("fetches".to_string(), self.fetches as f64);
        metrics.insert("inserts".to_string(), self.inserts as f64);
        metrics.insert("purges".to_string(), self.purges as f64);
        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert(
            "retries_suppressed".to_string(),
            self.retries_suppressed as f64,
        );
        metrics.insert("stale_served".to_string(), self.stale_served as f64);

        // Rates (0.0 to 1.0)
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("failure_rate".to_string(), self.failure_rate());

        metrics
    }
}
