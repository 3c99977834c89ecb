//! Expiration policies.
//!
//! An expiration policy baselines a slot when a value arrives
//! ([`fetched`](ExpirationPolicy::fetched)), answers whether that value is
//! still usable ([`is_expired`](ExpirationPolicy::is_expired)), and decides
//! whether an old value may be served when a refetch fails
//! ([`allow_expired_result`](ExpirationPolicy::allow_expired_result)).
//!
//! # Age-based expiry
//!
//! [`DurationSinceFetch`] stamps each slot with the generation and deadline of
//! its last fetch:
//!
//! ```text
//!   fetched at t0                     t0 + max_age
//!        │◀──────────── fresh ────────────▶│◀──── expired ────▶
//!        │                                 │
//!   expire(slot) moves the deadline to now
//!   expire_all() bumps the cache-wide generation; every older stamp is expired
//! ```
//!
//! `expire_all` never visits a slot, so it costs the same for one entry or
//! a million.

use crate::slot::SlotMeta;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Decides when cached values stop being usable.
pub trait ExpirationPolicy: Send + Sync + fmt::Debug {
    /// Called after a slot received a new value, by fetch or insert.
    fn fetched(&self, slot: &mut SlotMeta, now: Instant);

    /// Whether the slot's value must be refetched before being served.
    fn is_expired(&self, slot: &SlotMeta, now: Instant) -> bool;

    /// Whether a slot whose refetch just failed may keep serving its old value.
    fn allow_expired_result(&self, slot: &SlotMeta) -> bool;

    /// Forces one slot to report expired.
    fn expire(&self, slot: &mut SlotMeta, now: Instant);

    /// Forces every slot of the owning cache to report expired.
    fn expire_all(&self, now: Instant);
}

/// Values never expire on their own. Failed refetches fall back to the old value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverExpire;

impl ExpirationPolicy for NeverExpire {
    fn fetched(&self, _slot: &mut SlotMeta, _now: Instant) {}

    fn is_expired(&self, _slot: &SlotMeta, _now: Instant) -> bool {
        false
    }

    fn allow_expired_result(&self, _slot: &SlotMeta) -> bool {
        true
    }

    fn expire(&self, _slot: &mut SlotMeta, _now: Instant) {}

    fn expire_all(&self, _now: Instant) {}
}

#[derive(Debug, Clone, Copy)]
struct FetchStamp {
    generation: u64,
    expires_at: Option<Instant>,
}

/// Values expire a fixed time after they were fetched.
pub struct DurationSinceFetch {
    max_age: Duration,
    allow_expired_result: bool,
    generation: AtomicU64,
}

impl DurationSinceFetch {
    /// Expires values `max_age` after their fetch. Failed refetches fall back
    /// to the old value.
    pub fn new(max_age: Duration) -> Self {
        Self::with_allow_expired_result(max_age, true)
    }

    /// Like [`new`](Self::new), choosing whether failed refetches may serve
    /// the old value.
    pub fn with_allow_expired_result(max_age: Duration, allow_expired_result: bool) -> Self {
        Self {
            max_age,
            allow_expired_result,
            generation: AtomicU64::new(0),
        }
    }

    /// The configured lifetime of a fetched value.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl ExpirationPolicy for DurationSinceFetch {
    fn fetched(&self, slot: &mut SlotMeta, now: Instant) {
        slot.expiration_state_mut().insert(FetchStamp {
            generation: self.generation.load(Ordering::Acquire),
            expires_at: now.checked_add(self.max_age),
        });
    }

    fn is_expired(&self, slot: &SlotMeta, now: Instant) -> bool {
        match slot.expiration_state().get::<FetchStamp>() {
            None => true,
            Some(stamp) => {
                stamp.generation < self.generation.load(Ordering::Acquire)
                    || stamp.expires_at.is_some_and(|at| now >= at)
            }
        }
    }

    fn allow_expired_result(&self, _slot: &SlotMeta) -> bool {
        self.allow_expired_result
    }

    fn expire(&self, slot: &mut SlotMeta, now: Instant) {
        // A slot without a stamp already reports expired.
        if let Some(stamp) = slot.expiration_state_mut().get_mut::<FetchStamp>() {
            stamp.expires_at = Some(now);
        }
    }

    fn expire_all(&self, _now: Instant) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for DurationSinceFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurationSinceFetch")
            .field("max_age", &self.max_age)
            .field("allow_expired_result", &self.allow_expired_result)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
