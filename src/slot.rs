//! Per-key cache state.
//!
//! A slot is created the first time a key is referenced and lives until it is
//! purged. Its state is read as a set of predicates rather than a tag:
//!
//! ```text
//!                 fetch ok                    expires / expire()
//!   ┌───────┐  ─────────────▶  ┌───────┐  ─────────────────────▶  ┌───────┐
//!   │ Empty │                  │ Fresh │                          │ Stale │
//!   └───┬───┘  ◀──── purge ──  └───────┘  ◀──── fetch ok ───────  └───┬───┘
//!       │                          ▲                                   │
//!       │ fetch err                │ fetch ok                          │ fetch err
//!       ▼                          │                                   ▼
//!   ┌─────────────┐                │                     ┌──────────────────────┐
//!   │ Failed-bare │ ───────────────┘                     │ Failed-with-fallback │
//!   └─────────────┘                                      │ (allow_expired_result)│
//!                                                        └──────────────────────┘
//! ```
//!
//! | State | value | error |
//! |-------|-------|-------|
//! | Empty | none | none |
//! | Fresh | some, not expired | none |
//! | Stale | some, expired | none |
//! | Failed-bare | none | some |
//! | Failed-with-fallback | some | some |
//!
//! Policies see a slot through [`SlotMeta`], which exposes the timestamps and
//! flags read-only and gives each policy family one typed [`PolicyState`]
//! to keep its own bookkeeping in. The cache itself never looks inside a
//! `PolicyState`.
//!
//! All transitions happen while the owning cache holds the slot's lock.

use crate::policy::PolicySet;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A single type-erased value owned by one policy.
///
/// A policy stores whatever it needs with [`insert`](Self::insert) and reads
/// it back by type. Reading with a different type than the one stored yields
/// `None`, so a replaced policy simply starts from a blank state.
#[derive(Default)]
pub struct PolicyState(Option<Box<dyn Any + Send + Sync>>);

impl PolicyState {
    /// Borrows the stored value if it has type `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|state| state.downcast_ref::<T>())
    }

    /// Mutably borrows the stored value if it has type `T`.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_deref_mut().and_then(|state| state.downcast_mut::<T>())
    }

    /// Replaces whatever was stored with `value`.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }

    /// Drops the stored value.
    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyState")
            .field("occupied", &self.0.is_some())
            .finish()
    }
}

/// The part of a slot that policies may observe.
///
/// Flags and timestamps are maintained by the cache. Policies only write to
/// their own [`PolicyState`].
#[derive(Debug, Default)]
pub struct SlotMeta {
    has_value: bool,
    has_error: bool,
    last_fetch_attempt: Option<Instant>,
    last_fetch_success: Option<Instant>,
    last_access: Option<Instant>,
    expiration: PolicyState,
    retry: PolicyState,
}

impl SlotMeta {
    /// A usable cached value exists.
    pub fn has_value(&self) -> bool {
        self.has_value
    }

    /// The most recent fetch attempt failed.
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// When the last fetch started, successful or not.
    pub fn last_fetch_attempt(&self) -> Option<Instant> {
        self.last_fetch_attempt
    }

    /// When the value was last fetched or inserted.
    pub fn last_fetch_success(&self) -> Option<Instant> {
        self.last_fetch_success
    }

    /// When a caller last read through this slot.
    pub fn last_access(&self) -> Option<Instant> {
        self.last_access
    }

    /// State owned by the expiration policy.
    pub fn expiration_state(&self) -> &PolicyState {
        &self.expiration
    }

    /// Mutable state owned by the expiration policy.
    pub fn expiration_state_mut(&mut self) -> &mut PolicyState {
        &mut self.expiration
    }

    /// State owned by the fetch retry policy.
    pub fn retry_state(&self) -> &PolicyState {
        &self.retry
    }

    /// Mutable state owned by the fetch retry policy.
    pub fn retry_state_mut(&mut self) -> &mut PolicyState {
        &mut self.retry
    }
}

/// How a completed fetch resolved for the caller.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FetchOutcome<V> {
    /// The fetch succeeded; carries the newly stored value.
    Fetched(V),
    /// The fetch failed and the previous value is served instead.
    Stale(V),
}

impl<V> FetchOutcome<V> {
    pub(crate) fn into_stored(self) -> V {
        match self {
            FetchOutcome::Fetched(v) | FetchOutcome::Stale(v) => v,
        }
    }
}

/// Cache state for one key. `V` is the stored representation.
pub(crate) struct Slot<V, E> {
    meta: SlotMeta,
    value: Option<V>,
    error: Option<Arc<E>>,
}

impl<V: Clone, E> Slot<V, E> {
    pub(crate) fn new() -> Self {
        Self {
            meta: SlotMeta::default(),
            value: None,
            error: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn meta(&self) -> &SlotMeta {
        &self.meta
    }

    /// The stored value, if any, regardless of expiry.
    pub(crate) fn stored(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// The stored value if it exists and the expiration policy considers it fresh.
    pub(crate) fn fresh(&self, policies: &PolicySet<V>, now: Instant) -> Option<&V> {
        match &self.value {
            Some(value) if !policies.expiration.is_expired(&self.meta, now) => Some(value),
            _ => None,
        }
    }

    /// Fails with the remembered error when the retry policy refuses another attempt.
    pub(crate) fn check_retry(&self, policies: &PolicySet<V>, now: Instant) -> Result<(), Arc<E>> {
        match &self.error {
            Some(err) if !policies.retry.should_retry(&self.meta, now) => Err(Arc::clone(err)),
            _ => Ok(()),
        }
    }

    pub(crate) fn begin_fetch(&mut self, now: Instant) {
        self.meta.last_fetch_attempt = Some(now);
    }

    /// Applies the result of one physical fetch.
    ///
    /// The retry policy is told about the attempt before the expiration policy
    /// sees a new value.
    pub(crate) fn complete_fetch(
        &mut self,
        result: Result<V, E>,
        policies: &PolicySet<V>,
        now: Instant,
    ) -> Result<FetchOutcome<V>, Arc<E>> {
        match result {
            Ok(raw) => {
                let stored = policies.value.store(raw);
                self.value = Some(stored.clone());
                self.error = None;
                self.meta.has_value = true;
                self.meta.has_error = false;
                self.meta.last_fetch_success = Some(now);
                policies.retry.fetch_attempted(&mut self.meta, true, now);
                policies.expiration.fetched(&mut self.meta, now);
                Ok(FetchOutcome::Fetched(stored))
            }
            Err(err) => {
                let err = Arc::new(err);
                policies.retry.fetch_attempted(&mut self.meta, false, now);
                self.error = Some(Arc::clone(&err));
                self.meta.has_error = true;
                match &self.value {
                    Some(previous) if policies.expiration.allow_expired_result(&self.meta) => {
                        Ok(FetchOutcome::Stale(previous.clone()))
                    }
                    _ => {
                        self.value = None;
                        self.meta.has_value = false;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Seeds the slot as if `value` had just been fetched.
    pub(crate) fn insert(&mut self, value: V, policies: &PolicySet<V>, now: Instant) {
        self.value = Some(policies.value.store(value));
        self.error = None;
        self.meta.has_value = true;
        self.meta.has_error = false;
        self.meta.last_fetch_attempt = Some(now);
        self.meta.last_fetch_success = Some(now);
        self.meta.last_access = Some(now);
        policies.expiration.fetched(&mut self.meta, now);
    }

    /// Marks the slot stale through the expiration policy and returns the stored value.
    pub(crate) fn expire(&mut self, policies: &PolicySet<V>, now: Instant) -> Option<V> {
        policies.expiration.expire(&mut self.meta, now);
        self.value.clone()
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.meta.last_access = Some(now);
    }
}

impl<V, E> fmt::Debug for Slot<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("meta", &self.meta)
            .field("has_value", &self.value.is_some())
            .field("has_error", &self.error.is_some())
            .finish()
    }
}
