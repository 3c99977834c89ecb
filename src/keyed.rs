//! Keyed caches.
//!
//! A keyed cache memoizes one call shape. Each distinct key gets a slot; each
//! slot has its own lock, and at most one fetch per slot runs at a time.
//!
//! ```text
//!   get(key)
//!     │
//!     ├─▶ SlotMap: get-or-create the slot cell (segment lock, brief)
//!     │
//!     └─▶ slot lock
//!           ├─ fetch pending?  ─────────────────────▶ join it (async)
//!           ├─ value fresh?    ─────────────────────▶ retrieve, done
//!           ├─ failed and retry refused? ───────────▶ RetrySuppressed
//!           └─ fetch ─┬─ ok ──▶ store, notify retry then expiration
//!                     └─ err ─▶ notify retry, keep old value if allowed,
//!                               otherwise clear it and return the error
//! ```
//!
//! [`KeyedCache`] runs the fetch while holding the slot lock, so callers of
//! the same key queue behind it. [`AsyncKeyedCache`] installs a shared future
//! under the lock and releases it before awaiting; later callers for that key
//! await the same future.
//!
//! Both variants share bookkeeping for purge, expire, insert and policy
//! replacement. No operation ever holds two slot locks, or a segment lock
//! together with a slot lock.

mod slots;
mod sync;

#[cfg(feature = "async")]
mod async_cache;

#[cfg(feature = "async")]
pub use async_cache::AsyncKeyedCache;
pub use sync::KeyedCache;

use crate::clock::Clock;
use crate::config::KeyedCacheConfig;
use crate::metrics::FetchMetrics;
use crate::policy::{
    default_expiration_policy, default_fetch_retry_policy, ExpirationPolicy, FetchRetryPolicy,
    IdentityValuePolicy, PolicySet, ValuePolicy,
};
use crate::slot::Slot;
use parking_lot::RwLock;
use slots::SlotMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Lock-guarded access to the slot inside a map cell.
pub(crate) trait SlotCell {
    type Value: Clone + Send + Sync + 'static;
    type Error;

    fn empty() -> Self;

    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot<Self::Value, Self::Error>) -> R) -> R;
}

/// State and bookkeeping shared by the blocking and async caches.
pub(crate) struct CacheCore<K, C: SlotCell> {
    shape: Arc<str>,
    slots: SlotMap<K, C>,
    policies: RwLock<PolicySet<C::Value>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FetchMetrics>,
}

impl<K, C> CacheCore<K, C>
where
    K: Hash + Eq + Clone,
    C: SlotCell,
{
    pub(crate) fn new(config: KeyedCacheConfig) -> Self {
        Self {
            shape: Arc::from(config.shape()),
            slots: SlotMap::new(config.segments()),
            policies: RwLock::new(PolicySet::defaults()),
            clock: Arc::clone(config.clock()),
            metrics: Arc::new(FetchMetrics::default()),
        }
    }

    #[inline]
    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn shape(&self) -> &str {
        &self.shape
    }

    pub(crate) fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }

    #[cfg(feature = "async")]
    pub(crate) fn shape_arc(&self) -> Arc<str> {
        Arc::clone(&self.shape)
    }

    #[cfg(feature = "async")]
    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the cell for `key`, creating an empty one on first use.
    pub(crate) fn cell(&self, key: &K) -> Arc<C> {
        self.slots.get_or_create(key, C::empty)
    }

    /// The policies for one operation, copied out so no policy lock is held
    /// while a slot is locked.
    pub(crate) fn policies(&self) -> PolicySet<C::Value> {
        self.policies.read().clone()
    }

    pub(crate) fn set_expiration_policy(&self, policy: Arc<dyn ExpirationPolicy>) {
        self.policies.write().expiration = policy;
    }

    pub(crate) fn reset_expiration_policy(&self) {
        self.set_expiration_policy(default_expiration_policy());
    }

    pub(crate) fn expiration_policy(&self) -> Arc<dyn ExpirationPolicy> {
        Arc::clone(&self.policies.read().expiration)
    }

    pub(crate) fn set_fetch_retry_policy(&self, policy: Arc<dyn FetchRetryPolicy>) {
        self.policies.write().retry = policy;
    }

    pub(crate) fn reset_fetch_retry_policy(&self) {
        self.set_fetch_retry_policy(default_fetch_retry_policy());
    }

    pub(crate) fn fetch_retry_policy(&self) -> Arc<dyn FetchRetryPolicy> {
        Arc::clone(&self.policies.read().retry)
    }

    pub(crate) fn set_value_policy(&self, policy: Arc<dyn ValuePolicy<C::Value>>) {
        self.policies.write().value = policy;
    }

    pub(crate) fn reset_value_policy(&self) {
        self.set_value_policy(Arc::new(IdentityValuePolicy));
    }

    pub(crate) fn value_policy(&self) -> Arc<dyn ValuePolicy<C::Value>> {
        Arc::clone(&self.policies.read().value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.slots.segment_count()
    }

    /// Removes the slot for `key` and returns its stored value.
    pub(crate) fn purge(&self, key: &K) -> Option<C::Value> {
        let cell = self.slots.remove(key)?;
        self.metrics.record_purges(1);
        cell.with_slot(|slot| slot.stored().cloned())
    }

    /// Marks the slot for `key` stale and returns its stored value.
    pub(crate) fn expire(&self, key: &K) -> Option<C::Value> {
        let cell = self.slots.get(key)?;
        let policies = self.policies();
        self.metrics.record_expiration();
        cell.with_slot(|slot| slot.expire(&policies, self.now()))
    }

    /// Seeds `key` with `value` as if it had just been fetched.
    pub(crate) fn insert(&self, key: K, value: C::Value) {
        let cell = self.cell(&key);
        let policies = self.policies();
        self.metrics.record_insert();
        cell.with_slot(|slot| slot.insert(value, &policies, self.now()));
    }

    pub(crate) fn purge_all(&self) {
        let cleared = self.slots.clear();
        self.metrics.record_purges(cleared);
        info!(shape = %self.shape, cleared, "purged all cache entries");
    }

    pub(crate) fn expire_all(&self) {
        self.policies().expiration.expire_all(self.now());
        info!(shape = %self.shape, "expired all cache entries");
    }
}

impl<K, C> fmt::Debug for CacheCore<K, C>
where
    K: Hash + Eq + Clone,
    C: SlotCell,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policies = self.policies.read();
        f.debug_struct("CacheCore")
            .field("shape", &self.shape)
            .field("entries", &self.slots.len())
            .field("segments", &self.slots.segment_count())
            .field("expiration", &policies.expiration)
            .field("retry", &policies.retry)
            .field("value", &policies.value)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Generates the operations both cache variants expose identically.
macro_rules! shared_cache_api {
    ($value:ty) => {
        /// Name of the call this cache memoizes.
        pub fn shape(&self) -> &str {
            self.core.shape()
        }

        /// Number of keys with a slot, fresh or not.
        ///
        /// Segments are locked one after another, so the count may be slightly
        /// stale under concurrent writes.
        pub fn len(&self) -> usize {
            self.core.len()
        }

        /// Returns `true` if no key has a slot.
        pub fn is_empty(&self) -> bool {
            self.core.is_empty()
        }

        /// Returns `true` if `key` has a slot, whether or not it holds a value.
        pub fn contains_key(&self, key: &K) -> bool {
            self.core.contains_key(key)
        }

        /// Number of independently locked key-map segments.
        pub fn segment_count(&self) -> usize {
            self.core.segment_count()
        }

        /// Removes `key` and returns its stored value, if it had one.
        ///
        /// No policy is consulted. The next `get` behaves like a first access.
        pub fn purge(&self, key: &K) -> Option<$value> {
            self.core.purge(key)
        }

        /// Marks `key` stale through the expiration policy and returns its
        /// stored value unchanged.
        ///
        /// The value stays available as a fallback if the next refetch fails.
        pub fn expire(&self, key: &K) -> Option<$value> {
            self.core.expire(key)
        }

        /// Stores `value` for `key` without fetching.
        ///
        /// The value goes through the value policy's `store`, clears any
        /// remembered error and baselines the expiration policy, exactly like
        /// a successful fetch.
        pub fn insert(&self, key: K, value: $value) {
            self.core.insert(key, value)
        }

        /// Removes every key.
        pub fn purge_all(&self) {
            self.core.purge_all()
        }

        /// Marks every key stale through the expiration policy, without
        /// visiting any slot.
        pub fn expire_all(&self) {
            self.core.expire_all()
        }

        /// The expiration policy in force.
        pub fn expiration_policy(&self) -> ::std::sync::Arc<dyn $crate::policy::ExpirationPolicy> {
            self.core.expiration_policy()
        }

        /// Replaces the expiration policy.
        pub fn set_expiration_policy<P>(&self, policy: P)
        where
            P: $crate::policy::ExpirationPolicy + 'static,
        {
            self.core.set_expiration_policy(::std::sync::Arc::new(policy))
        }

        /// Replaces the expiration policy with one that may be shared with other caches.
        pub fn set_shared_expiration_policy(
            &self,
            policy: ::std::sync::Arc<dyn $crate::policy::ExpirationPolicy>,
        ) {
            self.core.set_expiration_policy(policy)
        }

        /// Restores the default expiration policy, [`NeverExpire`](crate::policy::NeverExpire).
        pub fn reset_expiration_policy(&self) {
            self.core.reset_expiration_policy()
        }

        /// The fetch retry policy in force.
        pub fn fetch_retry_policy(&self) -> ::std::sync::Arc<dyn $crate::policy::FetchRetryPolicy> {
            self.core.fetch_retry_policy()
        }

        /// Replaces the fetch retry policy.
        pub fn set_fetch_retry_policy<P>(&self, policy: P)
        where
            P: $crate::policy::FetchRetryPolicy + 'static,
        {
            self.core.set_fetch_retry_policy(::std::sync::Arc::new(policy))
        }

        /// Replaces the fetch retry policy with one that may be shared with other caches.
        pub fn set_shared_fetch_retry_policy(
            &self,
            policy: ::std::sync::Arc<dyn $crate::policy::FetchRetryPolicy>,
        ) {
            self.core.set_fetch_retry_policy(policy)
        }

        /// Restores the default fetch retry policy, [`AlwaysRetry`](crate::policy::AlwaysRetry).
        pub fn reset_fetch_retry_policy(&self) {
            self.core.reset_fetch_retry_policy()
        }

        /// The value policy in force.
        pub fn value_policy(&self) -> ::std::sync::Arc<dyn $crate::policy::ValuePolicy<$value>> {
            self.core.value_policy()
        }

        /// Replaces the value policy.
        ///
        /// Values already stored keep the representation the previous policy gave them.
        pub fn set_value_policy<P>(&self, policy: P)
        where
            P: $crate::policy::ValuePolicy<$value> + 'static,
        {
            self.core.set_value_policy(::std::sync::Arc::new(policy))
        }

        /// Replaces the value policy with one that may be shared with other caches.
        pub fn set_shared_value_policy(
            &self,
            policy: ::std::sync::Arc<dyn $crate::policy::ValuePolicy<$value>>,
        ) {
            self.core.set_value_policy(policy)
        }

        /// Restores the default value policy, [`IdentityValuePolicy`](crate::policy::IdentityValuePolicy).
        pub fn reset_value_policy(&self) {
            self.core.reset_value_policy()
        }

        /// Counters for this cache.
        pub fn fetch_metrics(&self) -> $crate::metrics::FetchMetricsSnapshot {
            self.core.metrics().snapshot()
        }
    };
}

pub(crate) use shared_cache_api;
