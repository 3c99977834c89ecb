//! Registry builder.
//!
//! Policies can be assigned to every cache at once, or to one cache by
//! shape. Defaults are always applied first and per-shape policies second, so
//! a per-shape policy wins no matter which call came first:
//!
//! ```
//! use keyed_cache::policy::{DurationSinceFetch, ExponentialBackoff, NeverExpire};
//! use keyed_cache::{CacheRegistry, Fetch, KeyedCache, KeyedCacheConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # struct Db;
//! # #[derive(Clone, PartialEq, Eq, Hash)]
//! # struct UserById(u32);
//! # impl Fetch<Db> for UserById {
//! #     type Output = String;
//! #     type Error = std::io::Error;
//! #     fn fetch(&self, _: &Db) -> Result<String, std::io::Error> { Ok(format!("user-{}", self.0)) }
//! # }
//! # #[derive(Clone, PartialEq, Eq, Hash)]
//! # struct Countries;
//! # impl Fetch<Db> for Countries {
//! #     type Output = Vec<String>;
//! #     type Error = std::io::Error;
//! #     fn fetch(&self, _: &Db) -> Result<Vec<String>, std::io::Error> { Ok(vec!["NZ".into()]) }
//! # }
//! let db = Arc::new(Db);
//! let users = Arc::new(KeyedCache::new(db.clone(), KeyedCacheConfig::new("users::by_id")));
//! let countries = Arc::new(KeyedCache::<Db, Countries>::new(db, KeyedCacheConfig::new("countries")));
//!
//! let registry = CacheRegistry::builder()
//!     .register(users.clone())
//!     .register(countries)
//!     .expiration_policy("countries", NeverExpire)
//!     .default_expiration_policy(DurationSinceFetch::new(Duration::from_secs(60)))
//!     .default_fetch_retry_policy(ExponentialBackoff::new(
//!         Duration::from_millis(100),
//!         Duration::from_secs(30),
//!     )?)
//!     .build()?;
//!
//! assert_eq!(registry.len(), 2);
//! assert_eq!(users.get(&UserById(7))?, "user-7");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `build` consumes the builder, so a builder cannot be reconfigured after
//! it has produced its registry. Problems with shapes and value types are
//! reported by `build`.

use crate::error::UsageError;
use crate::policy::{ExpirationPolicy, FetchRetryPolicy, ValuePolicy};
use crate::registry::{CacheRegistry, ManagedCache, Registered};
use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A value policy with its value type erased.
struct ErasedValuePolicy {
    policy: Box<dyn Any + Send + Sync>,
    value_type: &'static str,
    value_type_id: TypeId,
}

impl ErasedValuePolicy {
    fn new<V: 'static>(policy: Arc<dyn ValuePolicy<V>>) -> Self {
        Self {
            policy: Box::new(policy),
            value_type: type_name::<V>(),
            value_type_id: TypeId::of::<V>(),
        }
    }

    fn matches(&self, cache: &dyn ManagedCache) -> bool {
        cache.value_type_id() == self.value_type_id
    }

    fn apply(&self, cache: &dyn ManagedCache) -> bool {
        cache.assign_value_policy(self.policy.as_ref())
    }

    fn mismatch(&self, shape: &str, cache: &dyn ManagedCache) -> UsageError {
        UsageError::ValueTypeMismatch {
            shape: shape.to_owned(),
            expected: self.value_type,
            actual: cache.value_type_name(),
        }
    }
}

/// Assembles a [`CacheRegistry`] and the policies of its caches.
#[derive(Default)]
pub struct CacheRegistryBuilder {
    caches: Vec<Registered>,
    default_expiration: Option<Arc<dyn ExpirationPolicy>>,
    default_retry: Option<Arc<dyn FetchRetryPolicy>>,
    default_values: Vec<ErasedValuePolicy>,
    expiration: Vec<(String, Arc<dyn ExpirationPolicy>)>,
    retry: Vec<(String, Arc<dyn FetchRetryPolicy>)>,
    values: Vec<(String, ErasedValuePolicy)>,
}

impl CacheRegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cache. Registration order is preserved by the registry.
    pub fn register<C>(mut self, cache: Arc<C>) -> Self
    where
        C: ManagedCache + 'static,
    {
        self.caches.push(Registered::new(cache));
        self
    }

    /// Expiration policy for every cache. One instance is shared by all of
    /// them, so cache-wide state such as an `expire_all` watermark is shared too.
    pub fn default_expiration_policy<P>(self, policy: P) -> Self
    where
        P: ExpirationPolicy + 'static,
    {
        self.default_shared_expiration_policy(Arc::new(policy))
    }

    /// Like [`default_expiration_policy`](Self::default_expiration_policy) with
    /// an already shared policy.
    pub fn default_shared_expiration_policy(mut self, policy: Arc<dyn ExpirationPolicy>) -> Self {
        self.default_expiration = Some(policy);
        self
    }

    /// Fetch retry policy for every cache.
    pub fn default_fetch_retry_policy<P>(self, policy: P) -> Self
    where
        P: FetchRetryPolicy + 'static,
    {
        self.default_shared_fetch_retry_policy(Arc::new(policy))
    }

    /// Like [`default_fetch_retry_policy`](Self::default_fetch_retry_policy)
    /// with an already shared policy.
    pub fn default_shared_fetch_retry_policy(mut self, policy: Arc<dyn FetchRetryPolicy>) -> Self {
        self.default_retry = Some(policy);
        self
    }

    /// Value policy for every cache whose values are of type `V`. Caches of
    /// other value types are left alone.
    pub fn default_value_policy<V, P>(mut self, policy: P) -> Self
    where
        V: 'static,
        P: ValuePolicy<V> + 'static,
    {
        let policy: Arc<dyn ValuePolicy<V>> = Arc::new(policy);
        self.default_values.push(ErasedValuePolicy::new(policy));
        self
    }

    /// Expiration policy for the cache registered under `shape`.
    pub fn expiration_policy<P>(mut self, shape: impl Into<String>, policy: P) -> Self
    where
        P: ExpirationPolicy + 'static,
    {
        self.expiration.push((shape.into(), Arc::new(policy)));
        self
    }

    /// Fetch retry policy for the cache registered under `shape`.
    pub fn fetch_retry_policy<P>(mut self, shape: impl Into<String>, policy: P) -> Self
    where
        P: FetchRetryPolicy + 'static,
    {
        self.retry.push((shape.into(), Arc::new(policy)));
        self
    }

    /// Value policy for the cache registered under `shape`, which must store `V`.
    pub fn value_policy<V, P>(mut self, shape: impl Into<String>, policy: P) -> Self
    where
        V: 'static,
        P: ValuePolicy<V> + 'static,
    {
        let policy: Arc<dyn ValuePolicy<V>> = Arc::new(policy);
        self.values
            .push((shape.into(), ErasedValuePolicy::new(policy)));
        self
    }

    /// Applies every policy and produces the registry.
    ///
    /// # Errors
    ///
    /// - [`UsageError::DuplicateShape`] if two caches share a shape.
    /// - [`UsageError::UnknownShape`] if a per-shape policy names no registered cache.
    /// - [`UsageError::ValueTypeMismatch`] if a per-shape value policy is for
    ///   a different value type than the cache stores.
    pub fn build(self) -> Result<CacheRegistry, UsageError> {
        let mut seen = HashSet::new();
        for entry in &self.caches {
            if !seen.insert(entry.shape()) {
                return Err(UsageError::DuplicateShape(entry.shape().to_owned()));
            }
        }

        let find = |shape: &str| {
            self.caches
                .iter()
                .find(|entry| entry.shape() == shape)
                .map(|entry| &entry.cache)
                .ok_or_else(|| UsageError::UnknownShape(shape.to_owned()))
        };

        // Resolve every per-shape target before touching any cache.
        let expiration = self
            .expiration
            .iter()
            .map(|(shape, policy)| Ok((find(shape)?, policy)))
            .collect::<Result<Vec<_>, UsageError>>()?;
        let retry = self
            .retry
            .iter()
            .map(|(shape, policy)| Ok((find(shape)?, policy)))
            .collect::<Result<Vec<_>, UsageError>>()?;
        let values = self
            .values
            .iter()
            .map(|(shape, policy)| {
                let cache = find(shape)?;
                if !policy.matches(cache.as_ref()) {
                    return Err(policy.mismatch(shape, cache.as_ref()));
                }
                Ok((cache, policy))
            })
            .collect::<Result<Vec<_>, UsageError>>()?;

        for entry in &self.caches {
            let cache = entry.cache.as_ref();
            if let Some(policy) = &self.default_expiration {
                cache.set_shared_expiration_policy(Arc::clone(policy));
            }
            if let Some(policy) = &self.default_retry {
                cache.set_shared_fetch_retry_policy(Arc::clone(policy));
            }
            for policy in &self.default_values {
                if policy.apply(cache) {
                    debug!(shape = cache.shape(), value_type = policy.value_type, "applied default value policy");
                }
            }
        }

        for (cache, policy) in expiration {
            debug!(shape = cache.shape(), policy = ?policy, "applied expiration policy");
            cache.set_shared_expiration_policy(Arc::clone(policy));
        }
        for (cache, policy) in retry {
            debug!(shape = cache.shape(), policy = ?policy, "applied fetch retry policy");
            cache.set_shared_fetch_retry_policy(Arc::clone(policy));
        }
        for (cache, policy) in values {
            if !policy.apply(cache.as_ref()) {
                return Err(policy.mismatch(cache.shape(), cache.as_ref()));
            }
            debug!(shape = cache.shape(), value_type = policy.value_type, "applied value policy");
        }

        Ok(CacheRegistry::from_entries(self.caches))
    }
}

impl fmt::Debug for CacheRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistryBuilder")
            .field(
                "caches",
                &self.caches.iter().map(Registered::shape).collect::<Vec<_>>(),
            )
            .field("default_expiration", &self.default_expiration)
            .field("default_retry", &self.default_retry)
            .field("default_value_policies", &self.default_values.len())
            .field("expiration_overrides", &self.expiration.len())
            .field("retry_overrides", &self.retry.len())
            .field("value_overrides", &self.values.len())
            .finish()
    }
}
