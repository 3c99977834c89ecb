//! Cache registry.
//!
//! A service usually exposes several cacheable calls, each with its own
//! keyed cache. The registry is the fixed, ordered set of those caches. It
//! addresses them by shape for bulk purge and expire, and carries the
//! policies assigned through [`CacheRegistryBuilder`](crate::CacheRegistryBuilder).
//!
//! ```text
//!   CacheRegistry
//!     ├─ "users::by_id"      KeyedCache<UserDb, UserById>
//!     ├─ "users::by_email"   KeyedCache<UserDb, UserByEmail>
//!     └─ "orders::recent"    AsyncKeyedCache<OrderApi, RecentOrders>
//!
//!   purge_all()            ─▶ every instance
//!   expire_all_for(shape)  ─▶ one instance
//! ```
//!
//! Caches of different key and value types sit side by side behind the
//! [`ManagedCache`] trait. A typed handle can be recovered with
//! [`CacheRegistry::get`].

use crate::error::UsageError;
use crate::fetch::Fetch;
use crate::keyed::KeyedCache;
use crate::metrics::{CacheMetrics, FetchMetricsSnapshot};
use crate::policy::{ExpirationPolicy, FetchRetryPolicy, ValuePolicy};
use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "async")]
use crate::fetch::AsyncFetch;
#[cfg(feature = "async")]
use crate::keyed::AsyncKeyedCache;

/// The type-independent face of a keyed cache.
pub trait ManagedCache: Send + Sync + fmt::Debug {
    /// Name of the call the cache memoizes.
    fn shape(&self) -> &str;

    /// Number of keys with a slot.
    fn len(&self) -> usize;

    /// Returns `true` if no key has a slot.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every key.
    fn purge_all(&self);

    /// Marks every key stale.
    fn expire_all(&self);

    /// Replaces the expiration policy.
    fn set_shared_expiration_policy(&self, policy: Arc<dyn ExpirationPolicy>);

    /// Restores the default expiration policy.
    fn reset_expiration_policy(&self);

    /// Replaces the fetch retry policy.
    fn set_shared_fetch_retry_policy(&self, policy: Arc<dyn FetchRetryPolicy>);

    /// Restores the default fetch retry policy.
    fn reset_fetch_retry_policy(&self);

    /// Name of the stored value type, for diagnostics.
    fn value_type_name(&self) -> &'static str;

    /// Identity of the stored value type.
    fn value_type_id(&self) -> TypeId;

    /// Replaces the value policy if `policy` is an `Arc<dyn ValuePolicy<V>>`
    /// for this cache's value type `V`. Returns whether it was applied.
    fn assign_value_policy(&self, policy: &dyn Any) -> bool;

    /// Counters for this cache.
    fn fetch_metrics(&self) -> FetchMetricsSnapshot;
}

macro_rules! impl_managed_cache {
    ($cache:ident, $fetch:ident) => {
        impl<S, K> ManagedCache for $cache<S, K>
        where
            S: ?Sized + Send + Sync + 'static,
            K: $fetch<S> + Hash + Eq + Clone + Send + Sync + 'static,
            K::Output: Clone + Send + Sync + 'static,
            K::Error: std::error::Error + Send + Sync + 'static,
        {
            fn shape(&self) -> &str {
                $cache::shape(self)
            }

            fn len(&self) -> usize {
                $cache::len(self)
            }

            fn purge_all(&self) {
                $cache::purge_all(self)
            }

            fn expire_all(&self) {
                $cache::expire_all(self)
            }

            fn set_shared_expiration_policy(&self, policy: Arc<dyn ExpirationPolicy>) {
                $cache::set_shared_expiration_policy(self, policy)
            }

            fn reset_expiration_policy(&self) {
                $cache::reset_expiration_policy(self)
            }

            fn set_shared_fetch_retry_policy(&self, policy: Arc<dyn FetchRetryPolicy>) {
                $cache::set_shared_fetch_retry_policy(self, policy)
            }

            fn reset_fetch_retry_policy(&self) {
                $cache::reset_fetch_retry_policy(self)
            }

            fn value_type_name(&self) -> &'static str {
                type_name::<K::Output>()
            }

            fn value_type_id(&self) -> TypeId {
                TypeId::of::<K::Output>()
            }

            fn assign_value_policy(&self, policy: &dyn Any) -> bool {
                match policy.downcast_ref::<Arc<dyn ValuePolicy<K::Output>>>() {
                    Some(policy) => {
                        $cache::set_shared_value_policy(self, Arc::clone(policy));
                        true
                    }
                    None => false,
                }
            }

            fn fetch_metrics(&self) -> FetchMetricsSnapshot {
                $cache::fetch_metrics(self)
            }
        }
    };
}

impl_managed_cache!(KeyedCache, Fetch);

#[cfg(feature = "async")]
impl_managed_cache!(AsyncKeyedCache, AsyncFetch);

/// One registered cache, held both type-erased and as `Any` for typed lookup.
#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) cache: Arc<dyn ManagedCache>,
    pub(crate) typed: Arc<dyn Any + Send + Sync>,
}

impl Registered {
    pub(crate) fn new<C>(cache: Arc<C>) -> Self
    where
        C: ManagedCache + 'static,
    {
        Self {
            cache: Arc::clone(&cache) as Arc<dyn ManagedCache>,
            typed: cache,
        }
    }

    pub(crate) fn shape(&self) -> &str {
        self.cache.shape()
    }
}

/// The fixed set of caches belonging to one service.
#[derive(Clone)]
pub struct CacheRegistry {
    entries: Vec<Registered>,
}

impl CacheRegistry {
    pub(crate) fn from_entries(entries: Vec<Registered>) -> Self {
        info!(caches = entries.len(), "built cache registry");
        Self { entries }
    }

    /// Starts assembling a registry.
    pub fn builder() -> crate::CacheRegistryBuilder {
        crate::CacheRegistryBuilder::new()
    }

    /// Every cache, in registration order.
    pub fn instances(&self) -> impl Iterator<Item = &Arc<dyn ManagedCache>> + '_ {
        self.entries.iter().map(|entry| &entry.cache)
    }

    /// Number of caches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no cache is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cache registered under `shape`.
    pub fn find(&self, shape: &str) -> Option<&Arc<dyn ManagedCache>> {
        self.entry(shape).map(|entry| &entry.cache)
    }

    /// The cache registered under `shape`, as its concrete type.
    ///
    /// # Errors
    ///
    /// [`UsageError::UnknownShape`] if nothing is registered under `shape`,
    /// [`UsageError::CacheTypeMismatch`] if the cache is not a `C`.
    pub fn get<C>(&self, shape: &str) -> Result<Arc<C>, UsageError>
    where
        C: Any + Send + Sync,
    {
        let entry = self
            .entry(shape)
            .ok_or_else(|| UsageError::UnknownShape(shape.to_owned()))?;
        Arc::clone(&entry.typed)
            .downcast::<C>()
            .map_err(|_| UsageError::CacheTypeMismatch {
                shape: shape.to_owned(),
                requested: type_name::<C>(),
            })
    }

    /// Removes every key from every cache.
    pub fn purge_all(&self) {
        for entry in &self.entries {
            entry.cache.purge_all();
        }
    }

    /// Marks every key of every cache stale.
    pub fn expire_all(&self) {
        for entry in &self.entries {
            entry.cache.expire_all();
        }
    }

    /// Removes every key from the cache registered under `shape`.
    ///
    /// # Errors
    ///
    /// [`UsageError::UnknownShape`] if nothing is registered under `shape`.
    pub fn purge_all_for(&self, shape: &str) -> Result<(), UsageError> {
        self.require(shape)?.purge_all();
        Ok(())
    }

    /// Marks every key of the cache registered under `shape` stale.
    ///
    /// # Errors
    ///
    /// [`UsageError::UnknownShape`] if nothing is registered under `shape`.
    pub fn expire_all_for(&self, shape: &str) -> Result<(), UsageError> {
        self.require(shape)?.expire_all();
        Ok(())
    }

    /// Counters per cache, keyed by shape.
    pub fn metrics_by_shape(&self) -> BTreeMap<String, FetchMetricsSnapshot> {
        self.entries
            .iter()
            .map(|entry| (entry.shape().to_owned(), entry.cache.fetch_metrics()))
            .collect()
    }

    fn entry(&self, shape: &str) -> Option<&Registered> {
        self.entries.iter().find(|entry| entry.shape() == shape)
    }

    fn require(&self, shape: &str) -> Result<&Arc<dyn ManagedCache>, UsageError> {
        self.find(shape)
            .ok_or_else(|| UsageError::UnknownShape(shape.to_owned()))
    }
}

impl CacheMetrics for CacheRegistry {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut total = FetchMetricsSnapshot::default();
        for entry in &self.entries {
            total.merge(&entry.cache.fetch_metrics());
        }
        total.to_btreemap()
    }

    fn cache_name(&self) -> &str {
        "registry"
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.shape()))
            .finish()
    }
}
