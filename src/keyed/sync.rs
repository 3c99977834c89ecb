//! Blocking keyed cache.
//!
//! The fetch for a key runs inside that key's slot lock. Concurrent callers
//! for the same key wait on the lock and then find the fresh value; callers
//! for other keys never touch it.

use super::{shared_cache_api, CacheCore, SlotCell};
use crate::config::KeyedCacheConfig;
use crate::error::CacheError;
use crate::fetch::Fetch;
use crate::metrics::CacheMetrics;
use crate::slot::{FetchOutcome, Slot};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace};

impl<V, E> SlotCell for Mutex<Slot<V, E>>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn empty() -> Self {
        Mutex::new(Slot::new())
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot<V, E>) -> R) -> R {
        f(&mut self.lock())
    }
}

/// A thread-safe memoizing cache for one blocking call shape.
///
/// Each key's fetch runs at most once at a time. Results are kept until the
/// expiration policy says otherwise; failures are governed by the retry policy.
///
/// # Type Parameters
///
/// - `S`: The source the fetch is performed against (a client, a service, a connection pool).
/// - `K`: Key type. Carries the call's arguments and implements [`Fetch<S>`].
///
/// # Example
///
/// ```
/// use keyed_cache::{Fetch, KeyedCache, KeyedCacheConfig};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Origin {
///     calls: AtomicUsize,
/// }
///
/// #[derive(Clone, PartialEq, Eq, Hash)]
/// struct Square(u64);
///
/// impl Fetch<Origin> for Square {
///     type Output = u64;
///     type Error = std::io::Error;
///
///     fn fetch(&self, origin: &Origin) -> Result<u64, std::io::Error> {
///         origin.calls.fetch_add(1, Ordering::SeqCst);
///         Ok(self.0 * self.0)
///     }
/// }
///
/// let origin = Arc::new(Origin { calls: AtomicUsize::new(0) });
/// let cache = KeyedCache::new(origin.clone(), KeyedCacheConfig::new("square"));
///
/// assert_eq!(cache.get(&Square(12)).unwrap(), 144);
/// assert_eq!(cache.get(&Square(12)).unwrap(), 144);
/// assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
/// ```
pub struct KeyedCache<S, K>
where
    S: ?Sized,
    K: Fetch<S>,
    K::Output: Clone + Send + Sync + 'static,
{
    source: Arc<S>,
    core: CacheCore<K, Mutex<Slot<K::Output, K::Error>>>,
}

impl<S, K> KeyedCache<S, K>
where
    S: ?Sized + Send + Sync + 'static,
    K: Fetch<S> + Hash + Eq + Clone + Send + Sync + 'static,
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
    /// Blocks while another caller fetches the same key.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Fetch`] when the fetch failed and no previous value may
    ///   be served in its place.
    /// - [`CacheError::RetrySuppressed`] when an earlier fetch failed and the
    ///   retry policy does not allow another attempt yet.
    pub fn get(&self, key: &K) -> Result<K::Output, CacheError<K::Error>> {
        let metrics = self.core.metrics();
        metrics.record_request();

        let cell = self.core.cell(key);
        let policies = self.core.policies();
        let mut slot = cell.lock();
        let now = self.core.now();

        if let Some(stored) = slot.fresh(&policies, now) {
            let value = policies.value.retrieve(stored);
            slot.touch(now);
            metrics.record_hit();
            return Ok(value);
        }

        if let Err(err) = slot.check_retry(&policies, now) {
            metrics.record_retry_suppressed();
            debug!(shape = %self.core.shape(), error = %err, "fetch retry suppressed");
            return Err(CacheError::RetrySuppressed(err));
        }

        slot.begin_fetch(now);
        metrics.record_fetch();
        trace!(shape = %self.core.shape(), "fetching");
        let result = key.fetch(&self.source);
        if let Err(err) = &result {
            metrics.record_fetch_failure();
            debug!(shape = %self.core.shape(), error = %err, "fetch failed");
        }

        let now = self.core.now();
        let stored = match slot.complete_fetch(result, &policies, now) {
            Ok(FetchOutcome::Fetched(stored)) => stored,
            Ok(FetchOutcome::Stale(stored)) => {
                metrics.record_stale_served();
                debug!(shape = %self.core.shape(), "serving previous value after failed fetch");
                stored
            }
            Err(err) => return Err(CacheError::Fetch(err)),
        };
        let value = policies.value.retrieve(&stored);
        slot.touch(now);
        Ok(value)
    }

    shared_cache_api!(K::Output);
}

impl<S, K> CacheMetrics for KeyedCache<S, K>
where
    S: ?Sized + Send + Sync + 'static,
    K: Fetch<S> + Hash + Eq + Clone + Send + Sync + 'static,
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

impl<S, K> fmt::Debug for KeyedCache<S, K>
where
    S: ?Sized,
    K: Fetch<S> + Hash + Eq + Clone,
    K::Output: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCache")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
