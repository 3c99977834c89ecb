//! Cache policies.
//!
//! A keyed cache delegates three decisions to pluggable strategies:
//!
//! | Family | Decides | Built-ins |
//! |--------|---------|-----------|
//! | [`ExpirationPolicy`] | whether a cached value is still usable, and whether it may be served after a failed refetch | [`NeverExpire`], [`DurationSinceFetch`] |
//! | [`FetchRetryPolicy`] | whether a failed fetch may be attempted again yet | [`AlwaysRetry`], [`ConstantInterval`], [`ExponentialBackoff`] |
//! | [`ValuePolicy`] | how a fetched value is stored and how it is handed back | [`IdentityValuePolicy`], [`MapValuePolicy`] |
//!
//! Policies hold no per-key data themselves. Anything they need to remember
//! about one key goes into the [`PolicyState`](crate::slot::PolicyState)
//! reserved for their family on that key's [`SlotMeta`](crate::slot::SlotMeta).
//! A policy can also keep cache-wide state, which is how
//! [`DurationSinceFetch`] makes `expire_all` constant time.
//!
//! Time is always supplied by the cache through a `now` argument.
//!
//! Policies are shared as `Arc<dyn …>`, so one instance can serve many caches.
//! Replacing a policy on a live cache takes effect for the next operation.

pub mod expiration;
pub mod retry;
pub mod value;

pub use expiration::{DurationSinceFetch, ExpirationPolicy, NeverExpire};
pub use retry::{AlwaysRetry, ConstantInterval, ExponentialBackoff, FetchRetryPolicy};
pub use value::{IdentityValuePolicy, MapValuePolicy, ValuePolicy};

use std::fmt;
use std::sync::Arc;

/// The policies in force for one operation.
///
/// Caches clone this out of their policy cell so that no policy lock is held
/// while a slot lock is.
pub(crate) struct PolicySet<V> {
    pub(crate) expiration: Arc<dyn ExpirationPolicy>,
    pub(crate) retry: Arc<dyn FetchRetryPolicy>,
    pub(crate) value: Arc<dyn ValuePolicy<V>>,
}

impl<V> PolicySet<V> {
    pub(crate) fn new(
        expiration: Arc<dyn ExpirationPolicy>,
        retry: Arc<dyn FetchRetryPolicy>,
        value: Arc<dyn ValuePolicy<V>>,
    ) -> Self {
        Self {
            expiration,
            retry,
            value,
        }
    }
}

impl<V> PolicySet<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Never expire, always retry, store values unchanged.
    pub(crate) fn defaults() -> Self {
        Self::new(
            default_expiration_policy(),
            default_fetch_retry_policy(),
            Arc::new(IdentityValuePolicy),
        )
    }
}

impl<V> Clone for PolicySet<V> {
    fn clone(&self) -> Self {
        Self {
            expiration: Arc::clone(&self.expiration),
            retry: Arc::clone(&self.retry),
            value: Arc::clone(&self.value),
        }
    }
}

impl<V> fmt::Debug for PolicySet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySet")
            .field("expiration", &self.expiration)
            .field("retry", &self.retry)
            .field("value", &self.value)
            .finish()
    }
}

pub(crate) fn default_expiration_policy() -> Arc<dyn ExpirationPolicy> {
    Arc::new(NeverExpire)
}

pub(crate) fn default_fetch_retry_policy() -> Arc<dyn FetchRetryPolicy> {
    Arc::new(AlwaysRetry)
}
