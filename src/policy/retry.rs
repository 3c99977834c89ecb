//! Fetch retry policies.
//!
//! After a fetch fails, the next `get` on that key asks the retry policy
//! whether another attempt is allowed. When it is not, the caller receives
//! [`CacheError::RetrySuppressed`](crate::CacheError::RetrySuppressed) and the
//! fetch is not invoked. The policy is told about every real attempt through
//! [`fetch_attempted`](FetchRetryPolicy::fetch_attempted), and never about a
//! suppressed one.
//!
//! # Exponential backoff
//!
//! With `initial = 1s` and `max = 10s`, failures at the moment each window
//! opens produce:
//!
//! ```text
//!   failure at   0s  ──▶ retry from  1s   (next interval 2s)
//!   failure at   1s  ──▶ retry from  3s   (next interval 4s)
//!   failure at   3s  ──▶ retry from  7s   (next interval 8s)
//!   failure at   7s  ──▶ retry from 15s   (next interval 10s, capped)
//!   failure at  15s  ──▶ retry from 25s   (next interval 10s)
//!   success          ──▶ state cleared, next failure starts again at 1s
//! ```

use crate::error::ConfigError;
use crate::slot::SlotMeta;
use std::fmt;
use std::time::{Duration, Instant};

/// Decides whether a failed fetch may be attempted again.
pub trait FetchRetryPolicy: Send + Sync + fmt::Debug {
    /// Consulted only for slots whose last attempt failed.
    fn should_retry(&self, slot: &SlotMeta, now: Instant) -> bool;

    /// Called once after every fetch that actually ran.
    fn fetch_attempted(&self, slot: &mut SlotMeta, success: bool, now: Instant);
}

/// Every `get` after a failure tries again.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRetry;

impl FetchRetryPolicy for AlwaysRetry {
    fn should_retry(&self, _slot: &SlotMeta, _now: Instant) -> bool {
        true
    }

    fn fetch_attempted(&self, _slot: &mut SlotMeta, _success: bool, _now: Instant) {}
}

/// Retries once a fixed interval has passed since the last attempt.
#[derive(Debug, Clone, Copy)]
pub struct ConstantInterval {
    interval: Duration,
}

impl ConstantInterval {
    /// Waits `interval` after each attempt.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Waits `secs` seconds after each attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `secs` is negative, NaN or infinite.
    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigError> {
        Ok(Self::new(ConfigError::duration_from_secs("interval", secs)?))
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FetchRetryPolicy for ConstantInterval {
    fn should_retry(&self, slot: &SlotMeta, now: Instant) -> bool {
        match slot.last_fetch_attempt() {
            None => true,
            Some(attempt) => attempt
                .checked_add(self.interval)
                .is_some_and(|allowed_at| allowed_at <= now),
        }
    }

    fn fetch_attempted(&self, _slot: &mut SlotMeta, _success: bool, _now: Instant) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    /// `None` when the wait runs past what `Instant` can represent.
    next_retry: Option<Instant>,
    next_interval: Duration,
}

/// Doubles the wait after each consecutive failure, up to a ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Starts at `initial` and never waits longer than `max`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MaxBelowInitial`] if `max < initial`.
    pub fn new(initial: Duration, max: Duration) -> Result<Self, ConfigError> {
        if max < initial {
            return Err(ConfigError::MaxBelowInitial { initial, max });
        }
        Ok(Self { initial, max })
    }

    /// Like [`new`](Self::new) with both bounds in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for negative or non-finite bounds, or when
    /// `max < initial`.
    pub fn from_secs_f64(initial: f64, max: f64) -> Result<Self, ConfigError> {
        Self::new(
            ConfigError::duration_from_secs("initial interval", initial)?,
            ConfigError::duration_from_secs("maximum interval", max)?,
        )
    }

    /// The wait after the first failure.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// The longest wait.
    pub fn max(&self) -> Duration {
        self.max
    }

    fn doubled(&self, interval: Duration) -> Duration {
        interval.saturating_mul(2).min(self.max)
    }
}

impl FetchRetryPolicy for ExponentialBackoff {
    fn should_retry(&self, slot: &SlotMeta, now: Instant) -> bool {
        match slot.retry_state().get::<Backoff>() {
            None => true,
            Some(backoff) => backoff.next_retry.is_some_and(|at| now >= at),
        }
    }

    fn fetch_attempted(&self, slot: &mut SlotMeta, success: bool, now: Instant) {
        let state = slot.retry_state_mut();
        if success {
            state.clear();
            return;
        }

        let wait = state
            .get::<Backoff>()
            .map_or(self.initial, |backoff| backoff.next_interval);
        state.insert(Backoff {
            next_retry: now.checked_add(wait),
            next_interval: self.doubled(wait),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_always_retry() {
        assert!(AlwaysRetry.should_retry(&SlotMeta::default(), Instant::now()));
    }

    #[test]
    fn test_constant_interval_without_attempt_retries() {
        let policy = ConstantInterval::new(secs(5));
        assert!(policy.should_retry(&SlotMeta::default(), Instant::now()));
    }

    #[test]
    fn test_constant_interval_rejects_negative() {
        assert_eq!(
            ConstantInterval::from_secs_f64(-0.5).unwrap_err(),
            ConfigError::NegativeInterval {
                name: "interval",
                value: -0.5
            }
        );
        assert!(ConstantInterval::from_secs_f64(f64::NAN).is_err());
        assert_eq!(
            ConstantInterval::from_secs_f64(0.0).unwrap().interval(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_backoff_rejects_inverted_bounds() {
        assert_eq!(
            ExponentialBackoff::new(secs(10), secs(1)).unwrap_err(),
            ConfigError::MaxBelowInitial {
                initial: secs(10),
                max: secs(1)
            }
        );
        assert!(ExponentialBackoff::from_secs_f64(-1.0, 5.0).is_err());
        assert!(ExponentialBackoff::new(secs(1), secs(1)).is_ok());
    }

    #[test]
    fn test_backoff_sequence_doubles_until_capped() {
        let policy = ExponentialBackoff::new(secs(1), secs(10)).unwrap();
        let t0 = Instant::now();
        let mut slot = SlotMeta::default();

        let mut now = t0;
        let mut windows = Vec::new();
        for _ in 0..5 {
            assert!(policy.should_retry(&slot, now));
            policy.fetch_attempted(&mut slot, false, now);
            let next = slot.retry_state().get::<Backoff>().unwrap().next_retry.unwrap();
            assert!(!policy.should_retry(&slot, next - Duration::from_millis(1)));
            windows.push((next - t0).as_secs());
            now = next;
        }
        assert_eq!(windows, vec![1, 3, 7, 15, 25]);
    }

    #[test]
    fn test_backoff_cap_applies_to_second_interval() {
        let policy = ExponentialBackoff::new(secs(4), secs(5)).unwrap();
        let t0 = Instant::now();
        let mut slot = SlotMeta::default();
        policy.fetch_attempted(&mut slot, false, t0);
        let state = *slot.retry_state().get::<Backoff>().unwrap();
        assert_eq!(state.next_retry, Some(t0 + secs(4)));
        assert_eq!(state.next_interval, secs(5));
    }

    #[test]
    fn test_backoff_unbounded_wait_never_retries() {
        let policy = ExponentialBackoff::new(Duration::MAX, Duration::MAX).unwrap();
        let t0 = Instant::now();
        let mut slot = SlotMeta::default();
        policy.fetch_attempted(&mut slot, false, t0);
        let state = *slot.retry_state().get::<Backoff>().unwrap();
        assert_eq!(state.next_retry, None);
        assert_eq!(state.next_interval, Duration::MAX);
        assert!(!policy.should_retry(&slot, t0 + secs(1_000_000)));

        // A doubling interval eventually outgrows Instant as well.
        let policy = ExponentialBackoff::new(secs(1), Duration::MAX).unwrap();
        let mut slot = SlotMeta::default();
        for _ in 0..80 {
            policy.fetch_attempted(&mut slot, false, t0);
        }
        assert_eq!(slot.retry_state().get::<Backoff>().unwrap().next_retry, None);
        assert!(!policy.should_retry(&slot, t0 + secs(1_000_000)));

        policy.fetch_attempted(&mut slot, true, t0);
        assert!(policy.should_retry(&slot, t0));
    }

    #[test]
    fn test_backoff_success_restarts_sequence() {
        let policy = ExponentialBackoff::new(secs(1), secs(10)).unwrap();
        let t0 = Instant::now();
        let mut slot = SlotMeta::default();
        policy.fetch_attempted(&mut slot, false, t0);
        policy.fetch_attempted(&mut slot, false, t0 + secs(1));
        policy.fetch_attempted(&mut slot, true, t0 + secs(3));
        assert!(slot.retry_state().is_empty());

        policy.fetch_attempted(&mut slot, false, t0 + secs(20));
        let state = slot.retry_state().get::<Backoff>().unwrap();
        assert_eq!(state.next_retry, Some(t0 + secs(21)));
    }
}
