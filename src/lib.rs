//! # keyed-cache
//!
//! A policy-driven memoizing cache. Each cache memoizes one call: a *key*
//! carries the call's arguments and knows how to perform it against a
//! *source*, and the cache makes sure that at most one fetch per key is in
//! flight while deciding, through three pluggable policies, when a value is
//! stale, when a failed call may be retried, and how values are stored.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  CacheRegistry            bulk purge / expire, default + per-shape policy │
//! │   ├─ KeyedCache<S, K>          blocking fetch, runs under the slot lock   │
//! │   └─ AsyncKeyedCache<S, K>     async fetch, shared in-flight future       │
//! │                                                                          │
//! │        key ─▶ SlotMap (lock-striped) ─▶ Slot (own lock)                  │
//! │                                          │                               │
//! │              ┌───────────────────────────┼───────────────────────┐       │
//! │              ▼                           ▼                       ▼       │
//! │       ExpirationPolicy           FetchRetryPolicy           ValuePolicy   │
//! │   NeverExpire                 AlwaysRetry                 Identity        │
//! │   DurationSinceFetch          ConstantInterval            Map             │
//! │                               ExponentialBackoff                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Fetch`] / [`AsyncFetch`] | implemented by key types; performs the memoized call |
//! | [`KeyedCache`] | thread-safe cache for blocking calls |
//! | [`AsyncKeyedCache`] | cache for async calls (feature `async`, on by default) |
//! | [`policy`] | expiration, retry and value policies |
//! | [`CacheRegistry`] / [`CacheRegistryBuilder`] | one service's caches, addressed by shape |
//! | [`clock`] | system and manual time sources |
//!
//! ## Example
//!
//! ```
//! use keyed_cache::policy::{DurationSinceFetch, ExponentialBackoff};
//! use keyed_cache::{CacheError, Fetch, KeyedCache, KeyedCacheConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct RatesApi;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("rates service unavailable")]
//! struct Unavailable;
//!
//! #[derive(Clone, PartialEq, Eq, Hash)]
//! struct Rate {
//!     from: &'static str,
//!     to: &'static str,
//! }
//!
//! impl Fetch<RatesApi> for Rate {
//!     type Output = f64;
//!     type Error = Unavailable;
//!
//!     fn fetch(&self, _api: &RatesApi) -> Result<f64, Unavailable> {
//!         match (self.from, self.to) {
//!             ("EUR", "USD") => Ok(1.09),
//!             _ => Err(Unavailable),
//!         }
//!     }
//! }
//!
//! let cache = KeyedCache::new(Arc::new(RatesApi), KeyedCacheConfig::new("rates"));
//! cache.set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(300)));
//! cache.set_fetch_retry_policy(
//!     ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60)).unwrap(),
//! );
//!
//! assert_eq!(cache.get(&Rate { from: "EUR", to: "USD" }).unwrap(), 1.09);
//!
//! // The first failure is reported; a retry within the backoff window is refused.
//! let gbp = Rate { from: "GBP", to: "JPY" };
//! assert!(matches!(cache.get(&gbp), Err(CacheError::Fetch(_))));
//! assert!(matches!(cache.get(&gbp), Err(CacheError::RetrySuppressed(_))));
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Effect |
//! |---------|---------|--------|
//! | `hashbrown` | yes | hashbrown maps for the key segments |
//! | `async` | yes | [`AsyncKeyedCache`] and [`AsyncFetch`], via `futures` |
//! | `nightly` | no | hashbrown nightly optimizations |
//!
//! ## Logging
//!
//! Cache decisions are reported through [`tracing`]: fetch start at `TRACE`,
//! fetch failures, stale fallbacks and suppressed retries at `DEBUG`, bulk
//! purge/expire and registry assembly at `INFO`. The crate never installs a
//! subscriber.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod builder;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod keyed;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod slot;

pub use builder::CacheRegistryBuilder;
pub use config::KeyedCacheConfig;
pub use error::{CacheError, ConfigError, UsageError};
#[cfg(feature = "async")]
pub use fetch::AsyncFetch;
pub use fetch::Fetch;
#[cfg(feature = "async")]
pub use keyed::AsyncKeyedCache;
pub use keyed::KeyedCache;
pub use metrics::CacheMetrics;
pub use registry::{CacheRegistry, ManagedCache};
