//! Concurrent Keyed Cache Usage Examples
//!
//! This example demonstrates multi-threaded usage of the blocking keyed cache:
//! single-flight fetching, failure handling and registry-wide invalidation.
//!
//! Run with: cargo run --example concurrent_usage

extern crate keyed_cache;

use keyed_cache::policy::{DurationSinceFetch, ExponentialBackoff, NeverExpire};
use keyed_cache::{CacheError, CacheMetrics, CacheRegistry, Fetch, KeyedCache, KeyedCacheConfig};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A pretend inventory service with slow lookups.
#[derive(Default)]
struct Inventory {
    lookups: AtomicUsize,
    down: AtomicBool,
}

#[derive(Debug, thiserror::Error)]
#[error("inventory service unavailable")]
struct Unavailable;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StockLevel {
    sku: String,
}

impl Fetch<Inventory> for StockLevel {
    type Output = u32;
    type Error = Unavailable;

    fn fetch(&self, inventory: &Inventory) -> Result<u32, Unavailable> {
        inventory.lookups.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(25));
        if inventory.down.load(Ordering::SeqCst) {
            return Err(Unavailable);
        }
        Ok(self.sku.bytes().map(u32::from).sum())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Warehouses;

impl Fetch<Inventory> for Warehouses {
    type Output = Vec<&'static str>;
    type Error = Unavailable;

    fn fetch(&self, inventory: &Inventory) -> Result<Vec<&'static str>, Unavailable> {
        inventory.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["AKL", "WLG", "CHC"])
    }
}

fn stock(sku: &str) -> StockLevel {
    StockLevel {
        sku: sku.to_string(),
    }
}

fn main() {
    println!("Concurrent Keyed Cache Examples");
    println!("===============================\n");

    single_flight();
    println!();

    stale_fallback_and_backoff();
    println!();

    segment_tuning();
    println!();

    registry_invalidation();
}

/// Many threads ask for the same key; only one lookup reaches the service.
fn single_flight() {
    println!("1. Single-Flight Fetching");
    println!("   ----------------------");

    let inventory = Arc::new(Inventory::default());
    let cache = Arc::new(KeyedCache::new(
        Arc::clone(&inventory),
        KeyedCacheConfig::new("stock"),
    ));

    let start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&stock("widget")).expect("lookup failed"))
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    println!(
        "   8 threads served in {:?} with {} lookup(s)",
        start.elapsed(),
        inventory.lookups.load(Ordering::SeqCst)
    );
}

/// A failed refresh serves the previous value; repeated failures back off.
fn stale_fallback_and_backoff() {
    println!("2. Stale Fallback and Backoff");
    println!("   --------------------------");

    let inventory = Arc::new(Inventory::default());
    let cache = KeyedCache::new(Arc::clone(&inventory), KeyedCacheConfig::new("stock"));
    cache.set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(60)));
    cache.set_fetch_retry_policy(
        ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5))
            .expect("valid backoff bounds"),
    );

    let level = cache.get(&stock("gadget")).expect("lookup failed");
    println!("   Fetched stock level: {level}");

    cache.expire(&stock("gadget"));
    inventory.down.store(true, Ordering::SeqCst);
    let fallback = cache.get(&stock("gadget")).expect("stale value expected");
    println!("   Service down, served previous level: {fallback}");

    match cache.get(&stock("gizmo")) {
        Err(CacheError::Fetch(err)) => println!("   New key fails: {err}"),
        other => println!("   Unexpected: {other:?}"),
    }
    match cache.get(&stock("gizmo")) {
        Err(CacheError::RetrySuppressed(err)) => {
            println!("   Immediate retry suppressed (last error: {err})")
        }
        other => println!("   Unexpected: {other:?}"),
    }

    let metrics = cache.fetch_metrics();
    println!(
        "   Requests: {}, fetches: {}, stale served: {}, suppressed: {}",
        metrics.requests, metrics.fetches, metrics.stale_served, metrics.retries_suppressed
    );
}

/// Segment count trades memory for less contention on the key map.
fn segment_tuning() {
    println!("3. Segment Tuning");
    println!("   --------------");

    for segments in [1, 8, 32] {
        let inventory = Arc::new(Inventory::default());
        let config = KeyedCacheConfig::new("stock")
            .with_segments(NonZeroUsize::new(segments).expect("non-zero"));
        let cache = Arc::new(KeyedCache::new(inventory, config));
        for i in 0..64 {
            cache.insert(stock(&format!("sku-{i}")), i);
        }

        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..10_000 {
                        let key = stock(&format!("sku-{}", (i + t) % 64));
                        cache.get(&key).expect("seeded value");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        println!(
            "   {:>2} segments: {:?} for 40k hits",
            cache.segment_count(),
            start.elapsed()
        );
    }
}

/// One registry per service; invalidate everything or one call shape.
fn registry_invalidation() {
    println!("4. Registry Invalidation");
    println!("   ---------------------");

    let inventory = Arc::new(Inventory::default());
    let stock_cache = Arc::new(KeyedCache::new(
        Arc::clone(&inventory),
        KeyedCacheConfig::new("stock"),
    ));
    let warehouses = Arc::new(KeyedCache::new(
        Arc::clone(&inventory),
        KeyedCacheConfig::new("warehouses"),
    ));

    let registry = CacheRegistry::builder()
        .register(stock_cache.clone())
        .register(warehouses.clone())
        .default_expiration_policy(DurationSinceFetch::new(Duration::from_secs(300)))
        .expiration_policy("warehouses", NeverExpire)
        .build()
        .expect("valid registry");

    stock_cache.get(&stock("widget")).expect("lookup failed");
    warehouses.get(&Warehouses).expect("lookup failed");

    registry.expire_all_for("stock").expect("registered shape");
    println!("   Expired 'stock'; entries kept for fallback: {}", stock_cache.len());

    registry.purge_all();
    println!(
        "   Purged everything; entries left: {}",
        registry.instances().map(|c| c.len()).sum::<usize>()
    );

    for (name, value) in registry.metrics() {
        println!("   {name:<20} {value}");
    }
}
