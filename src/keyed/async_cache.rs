//! Async keyed cache.
//!
//! The slot lock only guards bookkeeping. When a fetch is needed, a shared
//! future is installed in the slot and the lock is released; every caller for
//! that key, including ones arriving later, awaits the same future.
//!
//! ```text
//!   caller A ──lock──▶ no value ──▶ install pending ──unlock──▶ await ─┐
//!   caller B ──lock──▶ pending? ──▶ clone it ─────────unlock──▶ await ─┤
//!                                                                      ▼
//!                           fetch completes ──lock──▶ clear pending,
//!                                                    apply outcome ──▶ A, B
//! ```
//!
//! The fetch makes progress only while somebody polls it. If every waiter
//! goes away, the next caller for the key picks up the same future.

use super::{shared_cache_api, CacheCore, SlotCell};
use crate::clock::Clock;
use crate::config::KeyedCacheConfig;
use crate::error::CacheError;
use crate::fetch::AsyncFetch;
use crate::metrics::{CacheMetrics, FetchMetrics};
use crate::policy::PolicySet;
use crate::slot::{FetchOutcome, Slot};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

type PendingFetch<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

/// A slot plus the fetch currently running for it, if any.
pub(crate) struct AsyncSlot<V, E> {
    slot: Slot<V, E>,
    pending: Option<PendingFetch<V, E>>,
}

impl<V, E> SlotCell for Mutex<AsyncSlot<V, E>>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn empty() -> Self {
        Mutex::new(AsyncSlot {
            slot: Slot::new(),
            pending: None,
        })
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot<V, E>) -> R) -> R {
        f(&mut self.lock().slot)
    }
}

impl<V, E> fmt::Debug for AsyncSlot<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSlot")
            .field("slot", &self.slot)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// A memoizing cache for one asynchronous call shape.
///
/// Concurrent `get`s for a key share a single in-flight fetch. No lock is
/// held while awaiting it.
///
/// # Type Parameters
///
/// - `S`: The source the fetch is performed against.
/// - `K`: Key type. Carries the call's arguments and implements [`AsyncFetch<S>`].
///
/// # Example
///
/// ```
/// use futures::future::{BoxFuture, FutureExt};
/// use keyed_cache::{AsyncFetch, AsyncKeyedCache, KeyedCacheConfig};
/// use std::sync::Arc;
///
/// struct Greeter;
///
/// #[derive(Clone, PartialEq, Eq, Hash)]
/// struct Greeting(String);
///
/// impl AsyncFetch<Greeter> for Greeting {
///     type Output = String;
///     type Error = std::io::Error;
///
///     fn fetch(&self, _source: Arc<Greeter>) -> BoxFuture<'static, Result<String, std::io::Error>> {
///         let name = self.0.clone();
///         async move { Ok(format!("hello, {name}")) }.boxed()
///     }
/// }
///
/// # futures::executor::block_on(async {
/// let cache = AsyncKeyedCache::new(Arc::new(Greeter), KeyedCacheConfig::new("greeting"));
/// let greeting = cache.get(&Greeting("ferris".into())).await.unwrap();
/// assert_eq!(greeting, "hello, ferris");
/// # });
/// ```
pub struct AsyncKeyedCache<S, K>
where
    S: ?Sized,
    K: AsyncFetch<S>,
    K::Output: Clone + Send + Sync + 'static,
{
    source: Arc<S>,
    core: CacheCore<K, Mutex<AsyncSlot<K::Output, K::Error>>>,
}

impl<S, K> AsyncKeyedCache<S, K>
where
    S: ?Sized + Send + Sync + 'static,
    K: AsyncFetch<S> + Hash + Eq + Clone + Send + Sync + 'static,
    K::Output: Clone + Send + Sync + 'static,
    K::Error: std::error::Error + Send + Sync + 'static,
{
    /// Creates a cache that fetches from `source`.
    pub fn new(source: Arc<S>, config: KeyedCacheConfig) -> Self {
        Self {
            source,
            core: CacheCore::new(config),
        }
    }

    /// The source fetches run against.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Returns the value for `key`, fetching it if it is missing or expired.
    ///
    /// If a fetch for `key` is already running, waits for that one instead
    /// of starting another.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Fetch`] when the fetch failed and no previous value may
    ///   be served in its place. Every caller waiting on that fetch receives
    ///   the same error.
    /// - [`CacheError::RetrySuppressed`] when an earlier fetch failed and the
    ///   retry policy does not allow another attempt yet.
    pub async fn get(&self, key: &K) -> Result<K::Output, CacheError<K::Error>> {
        let metrics = self.core.metrics();
        metrics.record_request();

        let cell = self.core.cell(key);
        let policies = self.core.policies();
        let pending = {
            let mut guard = cell.lock();
            let now = self.core.now();
            if let Some(pending) = guard.pending.clone() {
                pending
            } else {
                if let Some(stored) = guard.slot.fresh(&policies, now) {
                    let value = policies.value.retrieve(stored);
                    guard.slot.touch(now);
                    metrics.record_hit();
                    return Ok(value);
                }

                if let Err(err) = guard.slot.check_retry(&policies, now) {
                    metrics.record_retry_suppressed();
                    debug!(shape = %self.core.shape(), error = %err, "fetch retry suppressed");
                    return Err(CacheError::RetrySuppressed(err));
                }

                guard.slot.begin_fetch(now);
                let pending = self.start_fetch(key, &cell, policies.clone());
                guard.pending = Some(pending.clone());
                pending
            }
        };

        let stored = pending.await.map_err(CacheError::Fetch)?;
        let value = policies.value.retrieve(&stored);
        cell.lock().slot.touch(self.core.now());
        Ok(value)
    }

    /// Builds the shared future for one physical fetch of `key`.
    fn start_fetch(
        &self,
        key: &K,
        cell: &Arc<Mutex<AsyncSlot<K::Output, K::Error>>>,
        policies: PolicySet<K::Output>,
    ) -> PendingFetch<K::Output, K::Error> {
        let metrics = self.core.metrics();
        metrics.record_fetch();
        trace!(shape = %self.core.shape(), "fetching");

        let fetch = key.fetch(Arc::clone(&self.source));
        let settle = Settle {
            cell: Arc::downgrade(cell),
            policies,
            clock: Arc::clone(self.core.clock()),
            metrics: Arc::clone(metrics),
            shape: self.core.shape_arc(),
        };

        async move {
            let result = AssertUnwindSafe(fetch).catch_unwind().await;
            settle.apply(result)
        }
        .boxed()
        .shared()
    }

    shared_cache_api!(K::Output);
}

/// Everything needed to record a fetch result once it arrives.
struct Settle<V, E> {
    cell: Weak<Mutex<AsyncSlot<V, E>>>,
    policies: PolicySet<V>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FetchMetrics>,
    shape: Arc<str>,
}

impl<V, E> Settle<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: std::error::Error,
{
    fn apply(
        self,
        result: std::thread::Result<Result<V, E>>,
    ) -> Result<V, Arc<E>> {
        let Some(cell) = self.cell.upgrade() else {
            // Purged while in flight: hand the result to the waiters without
            // recording it anywhere.
            let result = result.unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            let mut orphan = Slot::new();
            return orphan
                .complete_fetch(result, &self.policies, self.clock.now())
                .map(FetchOutcome::into_stored);
        };

        let mut guard = cell.lock();
        guard.pending = None;
        let result = match result {
            Ok(result) => result,
            Err(panic) => {
                drop(guard);
                std::panic::resume_unwind(panic)
            }
        };

        if let Err(err) = &result {
            self.metrics.record_fetch_failure();
            debug!(shape = %self.shape, error = %err, "fetch failed");
        }

        match guard.slot.complete_fetch(result, &self.policies, self.clock.now())? {
            FetchOutcome::Fetched(stored) => Ok(stored),
            FetchOutcome::Stale(stored) => {
                self.metrics.record_stale_served();
                debug!(shape = %self.shape, "serving previous value after failed fetch");
                Ok(stored)
            }
        }
    }
}

impl<S, K> CacheMetrics for AsyncKeyedCache<S, K>
where
    S: ?Sized + Send + Sync + 'static,
    K: AsyncFetch<S> + Hash + Eq + Clone + Send + Sync + 'static,
    K::Output: Clone + Send + Sync + 'static,
    K::Error: std::error::Error + Send + Sync + 'static,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.metrics().snapshot().to_btreemap()
    }

    fn cache_name(&self) -> &str {
        self.core.shape()
    }
}

impl<S, K> fmt::Debug for AsyncKeyedCache<S, K>
where
    S: ?Sized,
    K: AsyncFetch<S> + Hash + Eq + Clone,
    K::Output: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncKeyedCache")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
