//! Async Keyed Cache Usage
//!
//! Concurrent tasks share one in-flight fetch per key.
//!
//! Run with: cargo run --example async_usage

use futures::future::{join_all, BoxFuture, FutureExt};
use keyed_cache::policy::DurationSinceFetch;
use keyed_cache::{AsyncFetch, AsyncKeyedCache, KeyedCacheConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct WeatherApi {
    requests: AtomicUsize,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown city {0}")]
struct UnknownCity(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Forecast {
    city: &'static str,
}

impl AsyncFetch<WeatherApi> for Forecast {
    type Output = Arc<String>;
    type Error = UnknownCity;

    fn fetch(&self, api: Arc<WeatherApi>) -> BoxFuture<'static, Result<Arc<String>, UnknownCity>> {
        let city = self.city;
        async move {
            api.requests.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            match city {
                "Atlantis" => Err(UnknownCity(city.to_string())),
                _ => Ok(Arc::new(format!("{city}: 18C, light wind"))),
            }
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() {
    println!("Async Keyed Cache Example");
    println!("=========================\n");

    let api = Arc::new(WeatherApi::default());
    let cache = Arc::new(AsyncKeyedCache::new(
        Arc::clone(&api),
        KeyedCacheConfig::new("forecast"),
    ));
    cache.set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(600)));

    let start = Instant::now();
    let lookups = (0..20).map(|i| {
        let cache = Arc::clone(&cache);
        let city = if i % 2 == 0 { "Wellington" } else { "Dunedin" };
        async move { cache.get(&Forecast { city }).await }
    });
    let results = join_all(lookups).await;

    println!(
        "20 lookups for 2 cities in {:?}, {} upstream request(s)",
        start.elapsed(),
        api.requests.load(Ordering::SeqCst)
    );
    if let Some(Ok(first)) = results.first() {
        println!("  {first}");
    }

    match cache.get(&Forecast { city: "Atlantis" }).await {
        Ok(forecast) => println!("  {forecast}"),
        Err(err) => println!("  lookup failed: {err}"),
    }

    println!("\n{:#?}", cache.fetch_metrics());
}
