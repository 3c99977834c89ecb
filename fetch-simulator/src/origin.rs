//! Simulated origin
//!
//! Answers every key with a deterministic payload, but fails at a fixed
//! rate and unconditionally during outage windows. Failures are drawn from
//! a seeded generator so runs are reproducible.

use crate::models::Outage;
use keyed_cache::clock::ManualClock;
use keyed_cache::Fetch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("origin is down")]
    Outage,
    #[error("origin request failed")]
    Transient,
}

pub struct FlakyOrigin {
    clock: Arc<ManualClock>,
    failure_rate: f64,
    outages: Vec<Outage>,
    rng: Mutex<StdRng>,
    calls: AtomicU64,
}

impl FlakyOrigin {
    pub fn new(clock: Arc<ManualClock>, failure_rate: f64, outages: Vec<Outage>, seed: u64) -> Self {
        Self {
            clock,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            outages,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of calls that reached the origin.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn respond(&self, key: &str) -> Result<u64, OriginError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.elapsed();
        if self.outages.iter().any(|o| o.contains(now)) {
            trace!(key, at = ?now, "origin outage");
            return Err(OriginError::Outage);
        }
        let failed = match self.rng.lock() {
            Ok(mut rng) => rng.gen_bool(self.failure_rate),
            Err(poisoned) => poisoned.into_inner().gen_bool(self.failure_rate),
        };
        if failed {
            return Err(OriginError::Transient);
        }
        Ok(key.bytes().map(u64::from).sum())
    }
}

/// A trace key, fetched from the simulated origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimKey(pub String);

impl Fetch<FlakyOrigin> for SimKey {
    type Output = u64;
    type Error = OriginError;

    fn fetch(&self, origin: &FlakyOrigin) -> Result<u64, OriginError> {
        origin.respond(&self.0)
    }
}
