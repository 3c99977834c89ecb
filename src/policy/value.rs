//! Value policies.
//!
//! A value policy sits between the fetch and the slot: [`store`](ValuePolicy::store)
//! runs once when a value arrives, [`retrieve`](ValuePolicy::retrieve) runs on
//! every read. The two need not be inverses. A policy may normalize on the
//! way in, or hand out defensive copies on the way out.
//!
//! The stored form has the same type as the fetched value. To keep values in
//! a different shape (compressed, wrapped, interned), make the key's
//! `Output` a newtype or enum that can carry both forms, and let `store` and
//! `retrieve` convert between its variants.

use std::fmt;

/// Transforms values on their way into and out of a cache.
pub trait ValuePolicy<V>: Send + Sync + fmt::Debug {
    /// Turns a fetched value into its stored form.
    fn store(&self, value: V) -> V;

    /// Produces the value handed to a caller from the stored form.
    fn retrieve(&self, stored: &V) -> V;
}

/// Stores values unchanged and hands out clones.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityValuePolicy;

impl<V> ValuePolicy<V> for IdentityValuePolicy
where
    V: Clone,
{
    #[inline]
    fn store(&self, value: V) -> V {
        value
    }

    #[inline]
    fn retrieve(&self, stored: &V) -> V {
        stored.clone()
    }
}

type StoreFn<V> = Box<dyn Fn(V) -> V + Send + Sync>;
type RetrieveFn<V> = Box<dyn Fn(&V) -> V + Send + Sync>;

/// A value policy built from two closures.
///
/// ```
/// use keyed_cache::policy::{MapValuePolicy, ValuePolicy};
///
/// let trimmed = MapValuePolicy::new(|s: String| s.trim().to_owned(), String::clone);
/// assert_eq!(trimmed.store("  hello ".to_owned()), "hello");
/// ```
pub struct MapValuePolicy<V> {
    store: StoreFn<V>,
    retrieve: RetrieveFn<V>,
}

impl<V> MapValuePolicy<V> {
    /// Uses `store` on the way in and `retrieve` on the way out.
    pub fn new<S, R>(store: S, retrieve: R) -> Self
    where
        S: Fn(V) -> V + Send + Sync + 'static,
        R: Fn(&V) -> V + Send + Sync + 'static,
    {
        Self {
            store: Box::new(store),
            retrieve: Box::new(retrieve),
        }
    }
}

impl<V> ValuePolicy<V> for MapValuePolicy<V> {
    fn store(&self, value: V) -> V {
        (self.store)(value)
    }

    fn retrieve(&self, stored: &V) -> V {
        (self.retrieve)(stored)
    }
}

impl<V> fmt::Debug for MapValuePolicy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapValuePolicy").finish_non_exhaustive()
    }
}
