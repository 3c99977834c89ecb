//! Async Keyed Cache Tests
//!
//! Exercises `AsyncKeyedCache` on a multi-threaded tokio runtime.
//!
//! ## Test Strategy
//! - Fetches wait on a semaphore "gate" so tests decide when the origin answers
//! - Closing the gate makes every waiting and future fetch fail
//! - Call counts prove how many physical fetches ran
#![cfg(feature = "async")]

use futures::future::{BoxFuture, FutureExt};
use keyed_cache::clock::ManualClock;
use keyed_cache::policy::{ConstantInterval, DurationSinceFetch};
use keyed_cache::{AsyncFetch, AsyncKeyedCache, CacheError, KeyedCacheConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// TEST FIXTURES
// ============================================================================

#[derive(Debug, thiserror::Error)]
#[error("upstream rejected call #{0}")]
struct UpstreamError(usize);

struct Upstream {
    calls: AtomicUsize,
    gate: Semaphore,
    failing: AtomicBool,
}

impl Upstream {
    fn closed_gate() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn open_gate() -> Arc<Self> {
        let upstream = Self::closed_gate();
        upstream.open();
        upstream
    }

    fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Keys starting with `slow:` wait on the gate; others answer at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Quote(&'static str);

impl AsyncFetch<Upstream> for Quote {
    type Output = Arc<String>;
    type Error = UpstreamError;

    fn fetch(&self, upstream: Arc<Upstream>) -> BoxFuture<'static, Result<Arc<String>, UpstreamError>> {
        let symbol = self.0;
        async move {
            let call = upstream.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if symbol.starts_with("slow:") && upstream.gate.acquire().await.is_err() {
                return Err(UpstreamError(call));
            }
            if upstream.failing.load(Ordering::SeqCst) {
                return Err(UpstreamError(call));
            }
            Ok(Arc::new(format!("{symbol}@{call}")))
        }
        .boxed()
    }
}

fn cache(upstream: &Arc<Upstream>) -> Arc<AsyncKeyedCache<Upstream, Quote>> {
    Arc::new(AsyncKeyedCache::new(
        Arc::clone(upstream),
        KeyedCacheConfig::new("quotes"),
    ))
}

// ============================================================================
// SINGLE-FLIGHT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_fetch() {
    let upstream = Upstream::closed_gate();
    let cache = cache(&upstream);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(&Quote("slow:ACME")).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    upstream.open();

    let mut values = Vec::new();
    for task in tasks {
        values.push(task.await.unwrap().unwrap());
    }

    assert_eq!(upstream.calls(), 1, "one physical fetch for all callers");
    assert!(values.iter().all(|v| **v == "slow:ACME@1"));
    let metrics = cache.fetch_metrics();
    assert_eq!(metrics.requests, 16);
    assert_eq!(metrics.fetches, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_shared_by_all_waiters() {
    let upstream = Upstream::closed_gate();
    let cache = cache(&upstream);
    cache.set_fetch_retry_policy(ConstantInterval::new(Duration::from_secs(3600)));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(&Quote("slow:ACME")).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    upstream.gate.close();

    let mut errors = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Err(err) => errors.push(err.into_inner()),
            Ok(v) => panic!("unexpected value {v}"),
        }
    }

    assert_eq!(upstream.calls(), 1);
    let first = &errors[0];
    assert!(errors.iter().all(|e| Arc::ptr_eq(e, first)));
    assert_eq!(first.0, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_independent_keys_do_not_wait() {
    let upstream = Upstream::closed_gate();
    let cache = cache(&upstream);

    let blocked = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(&Quote("slow:HELD")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let free = tokio::time::timeout(Duration::from_secs(5), cache.get(&Quote("FREE")))
        .await
        .expect("unrelated key must not wait for a held fetch");
    assert!(free.unwrap().starts_with("FREE@"));

    blocked.abort();
}

// ============================================================================
// POLICIES
// ============================================================================

#[tokio::test]
async fn test_refetch_after_expiry() {
    let upstream = Upstream::open_gate();
    let clock = Arc::new(ManualClock::new());
    let cache = AsyncKeyedCache::new(
        Arc::clone(&upstream),
        KeyedCacheConfig::new("quotes").with_clock(clock.clone()),
    );
    cache.set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(30)));

    let first = cache.get(&Quote("ACME")).await.unwrap();
    clock.advance(Duration::from_secs(29));
    let cached = cache.get(&Quote("ACME")).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));

    clock.advance(Duration::from_secs(1));
    let refreshed = cache.get(&Quote("ACME")).await.unwrap();
    assert_eq!(*refreshed, "ACME@2");
}

#[tokio::test]
async fn test_stale_value_served_after_failed_refetch() {
    let upstream = Upstream::open_gate();
    let cache = cache(&upstream);
    cache.set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(30)));

    let first = cache.get(&Quote("ACME")).await.unwrap();
    assert!(cache.expire(&Quote("ACME")).is_some());
    upstream.failing.store(true, Ordering::SeqCst);

    let served = cache.get(&Quote("ACME")).await.unwrap();
    assert!(Arc::ptr_eq(&first, &served));
    assert_eq!(upstream.calls(), 2);
    assert_eq!(cache.fetch_metrics().stale_served, 1);
}

#[tokio::test]
async fn test_retry_suppressed_without_fetch() {
    let upstream = Upstream::open_gate();
    upstream.failing.store(true, Ordering::SeqCst);
    let cache = cache(&upstream);
    cache.set_fetch_retry_policy(ConstantInterval::new(Duration::from_secs(3600)));

    assert!(matches!(
        cache.get(&Quote("ACME")).await,
        Err(CacheError::Fetch(_))
    ));
    let err = cache.get(&Quote("ACME")).await.unwrap_err();
    assert!(err.is_retry_suppressed());
    assert_eq!(err.fetch_error().0, 1);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn test_insert_and_purge() {
    let upstream = Upstream::open_gate();
    let cache = cache(&upstream);

    cache.insert(Quote("ACME"), Arc::new("seeded".to_string()));
    assert_eq!(*cache.get(&Quote("ACME")).await.unwrap(), "seeded");
    assert_eq!(upstream.calls(), 0);

    assert_eq!(cache.purge(&Quote("ACME")).as_deref().map(String::as_str), Some("seeded"));
    assert_eq!(*cache.get(&Quote("ACME")).await.unwrap(), "ACME@1");
}

#[tokio::test]
async fn test_purge_all_and_expire_all() {
    let upstream = Upstream::open_gate();
    let cache = cache(&upstream);
    cache.set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(3600)));

    cache.get(&Quote("A")).await.unwrap();
    cache.get(&Quote("B")).await.unwrap();

    cache.expire_all();
    assert_eq!(cache.len(), 2);
    assert_eq!(*cache.get(&Quote("A")).await.unwrap(), "A@3");

    cache.purge_all();
    assert!(cache.is_empty());
    assert_eq!(*cache.get(&Quote("B")).await.unwrap(), "B@4");
}
