//! Correctness Tests for the Blocking Keyed Cache
//!
//! Every test drives time through a shared `ManualClock` so that expiry and
//! backoff boundaries are hit exactly.
//!
//! ## Test Strategy
//! - A scripted origin that counts calls and can be switched to failing
//! - Keys that return a fresh `Arc` on every fetch, so identity shows whether
//!   a value was served from the cache or refetched
//! - Recording policies to observe callback order

use keyed_cache::clock::{Clock, ManualClock};
use keyed_cache::policy::{
    AlwaysRetry, ConstantInterval, DurationSinceFetch, ExpirationPolicy, ExponentialBackoff,
    FetchRetryPolicy, MapValuePolicy, NeverExpire,
};
use keyed_cache::slot::SlotMeta;
use keyed_cache::{CacheError, Fetch, KeyedCache, KeyedCacheConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// TEST FIXTURES
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("origin failure #{0}")]
struct OriginError(usize);

#[derive(Default)]
struct Origin {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl Origin {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Lookup(&'static str);

impl Fetch<Origin> for Lookup {
    type Output = Arc<String>;
    type Error = OriginError;

    fn fetch(&self, origin: &Origin) -> Result<Arc<String>, OriginError> {
        let call = origin.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if origin.failing.load(Ordering::SeqCst) {
            Err(OriginError(call))
        } else {
            Ok(Arc::new(format!("{}#{}", self.0, call)))
        }
    }
}

struct Fixture {
    origin: Arc<Origin>,
    clock: Arc<ManualClock>,
    cache: KeyedCache<Origin, Lookup>,
}

fn fixture() -> Fixture {
    let origin = Arc::new(Origin::default());
    let clock = Arc::new(ManualClock::new());
    let config = KeyedCacheConfig::new("lookup").with_clock(clock.clone());
    let cache = KeyedCache::new(origin.clone(), config);
    Fixture {
        origin,
        clock,
        cache,
    }
}

/// Records the order of policy callbacks.
#[derive(Debug, Default)]
struct Journal(Mutex<Vec<&'static str>>);

impl Journal {
    fn push(&self, event: &'static str) {
        self.0.lock().push(event);
    }

    fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[derive(Debug)]
struct RecordingExpiration(Arc<Journal>);

impl ExpirationPolicy for RecordingExpiration {
    fn fetched(&self, _slot: &mut SlotMeta, _now: Instant) {
        self.0.push("expiration.fetched");
    }

    fn is_expired(&self, _slot: &SlotMeta, _now: Instant) -> bool {
        true
    }

    fn allow_expired_result(&self, _slot: &SlotMeta) -> bool {
        self.0.push("expiration.allow_expired_result");
        true
    }

    fn expire(&self, _slot: &mut SlotMeta, _now: Instant) {
        self.0.push("expiration.expire");
    }

    fn expire_all(&self, _now: Instant) {
        self.0.push("expiration.expire_all");
    }
}

#[derive(Debug)]
struct RecordingRetry {
    journal: Arc<Journal>,
    allow: bool,
}

impl FetchRetryPolicy for RecordingRetry {
    fn should_retry(&self, _slot: &SlotMeta, _now: Instant) -> bool {
        self.journal.push("retry.should_retry");
        self.allow
    }

    fn fetch_attempted(&self, _slot: &mut SlotMeta, success: bool, _now: Instant) {
        self.journal.push(if success {
            "retry.attempted(ok)"
        } else {
            "retry.attempted(err)"
        });
    }
}

// ============================================================================
// MEMOIZATION
// ============================================================================

#[test]
fn test_fresh_value_is_the_same_object() {
    let f = fixture();
    let first = f.cache.get(&Lookup("a")).unwrap();
    for _ in 0..5 {
        let again = f.cache.get(&Lookup("a")).unwrap();
        assert!(Arc::ptr_eq(&first, &again), "fresh value must not be refetched");
    }
    assert_eq!(f.origin.calls(), 1);
}

#[test]
fn test_keys_are_independent() {
    let f = fixture();
    let a = f.cache.get(&Lookup("a")).unwrap();
    let b = f.cache.get(&Lookup("b")).unwrap();
    assert_eq!(*a, "a#1");
    assert_eq!(*b, "b#2");
    assert_eq!(f.cache.len(), 2);
}

// ============================================================================
// EXPIRATION
// ============================================================================

#[test]
fn test_duration_since_fetch_boundary() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(5)));

    let first = f.cache.get(&Lookup("a")).unwrap();

    f.clock.advance(Duration::from_millis(4_900));
    let before = f.cache.get(&Lookup("a")).unwrap();
    assert!(Arc::ptr_eq(&first, &before));
    assert_eq!(f.origin.calls(), 1);

    f.clock.advance(Duration::from_millis(100));
    let after = f.cache.get(&Lookup("a")).unwrap();
    assert!(!Arc::ptr_eq(&first, &after));
    assert_eq!(f.origin.calls(), 2);
}

#[test]
fn test_expire_forces_refetch_and_returns_value() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(60)));

    let first = f.cache.get(&Lookup("a")).unwrap();
    let expired = f.cache.expire(&Lookup("a")).unwrap();
    assert!(Arc::ptr_eq(&first, &expired));
    assert!(f.cache.contains_key(&Lookup("a")));

    let refreshed = f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(*refreshed, "a#2");
}

#[test]
fn test_expire_unknown_key_is_none() {
    let f = fixture();
    assert_eq!(f.cache.expire(&Lookup("missing")), None);
    assert!(!f.cache.contains_key(&Lookup("missing")));
}

#[test]
fn test_never_expire_ignores_time() {
    let f = fixture();
    f.cache.get(&Lookup("a")).unwrap();
    f.clock.advance(Duration::from_secs(365 * 24 * 3600));
    f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(f.origin.calls(), 1);
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[test]
fn test_stale_value_served_when_refetch_fails() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(5)));

    let v = f.cache.get(&Lookup("a")).unwrap();
    f.cache.expire(&Lookup("a"));
    f.origin.set_failing(true);

    let served = f.cache.get(&Lookup("a")).unwrap();
    assert!(Arc::ptr_eq(&v, &served));
    assert_eq!(f.origin.calls(), 2);
    assert_eq!(f.cache.fetch_metrics().stale_served, 1);
}

#[test]
fn test_failure_propagates_when_fallback_disallowed() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::with_allow_expired_result(
            Duration::from_secs(5),
            false,
        ));

    f.cache.get(&Lookup("a")).unwrap();
    f.clock.advance(Duration::from_secs(5));
    f.origin.set_failing(true);

    let err = f.cache.get(&Lookup("a")).unwrap_err();
    assert_eq!(err.fetch_error(), &OriginError(2));
    assert!(!err.is_retry_suppressed());

    // The old value is gone: purge has nothing to return.
    assert_eq!(f.cache.purge(&Lookup("a")), None);
}

#[test]
fn test_failure_without_previous_value_propagates() {
    let f = fixture();
    f.origin.set_failing(true);
    let err = f.cache.get(&Lookup("a")).unwrap_err();
    assert!(matches!(err, CacheError::Fetch(ref e) if **e == OriginError(1)));

    // Default retry policy tries again on the next call.
    f.origin.set_failing(false);
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "a#2");
}

#[test]
fn test_suppressed_retry_wraps_original_error() {
    let f = fixture();
    let journal = Arc::new(Journal::default());
    f.cache.set_fetch_retry_policy(RecordingRetry {
        journal: journal.clone(),
        allow: false,
    });
    f.origin.set_failing(true);

    assert!(f.cache.get(&Lookup("a")).is_err());
    assert_eq!(journal.take(), vec!["retry.attempted(err)"]);

    let err = f.cache.get(&Lookup("a")).unwrap_err();
    assert!(err.is_retry_suppressed());
    assert_eq!(err.fetch_error(), &OriginError(1));
    assert_eq!(f.origin.calls(), 1, "suppressed retry must not fetch");
    assert_eq!(
        journal.take(),
        vec!["retry.should_retry"],
        "suppressed retry must not notify fetch_attempted"
    );
    assert_eq!(f.cache.fetch_metrics().retries_suppressed, 1);
}

#[test]
fn test_retry_policy_not_consulted_without_error() {
    let f = fixture();
    let journal = Arc::new(Journal::default());
    f.cache.set_fetch_retry_policy(RecordingRetry {
        journal: journal.clone(),
        allow: false,
    });
    f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(journal.take(), vec!["retry.attempted(ok)"]);
}

#[test]
fn test_retry_notified_before_expiration_fetched() {
    let f = fixture();
    let journal = Arc::new(Journal::default());
    f.cache
        .set_expiration_policy(RecordingExpiration(journal.clone()));
    f.cache.set_fetch_retry_policy(RecordingRetry {
        journal: journal.clone(),
        allow: true,
    });

    f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(
        journal.take(),
        vec!["retry.attempted(ok)", "expiration.fetched"]
    );

    // A failure with a value present asks whether the stale value may be served.
    // Without a remembered error the retry policy is not asked first.
    f.origin.set_failing(true);
    f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(
        journal.take(),
        vec!["retry.attempted(err)", "expiration.allow_expired_result"]
    );

    // With one, it is.
    f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(
        journal.take(),
        vec![
            "retry.should_retry",
            "retry.attempted(err)",
            "expiration.allow_expired_result"
        ]
    );
}

#[test]
fn test_constant_interval_gates_retries() {
    let f = fixture();
    f.cache
        .set_fetch_retry_policy(ConstantInterval::new(Duration::from_secs(10)));
    f.origin.set_failing(true);

    assert!(matches!(
        f.cache.get(&Lookup("a")),
        Err(CacheError::Fetch(_))
    ));
    f.clock.advance(Duration::from_millis(9_900));
    assert!(matches!(
        f.cache.get(&Lookup("a")),
        Err(CacheError::RetrySuppressed(_))
    ));
    f.clock.advance(Duration::from_millis(100));
    f.origin.set_failing(false);
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "a#2");
}

#[test]
fn test_exponential_backoff_sequence() {
    let f = fixture();
    f.cache.set_fetch_retry_policy(
        ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10)).unwrap(),
    );
    f.origin.set_failing(true);
    let start = f.clock.now();

    // Failures at each window opening; windows open at 1, 3, 7, 15, 25.
    assert!(matches!(f.cache.get(&Lookup("a")), Err(CacheError::Fetch(_))));
    let mut eligible = Vec::new();
    for _ in 0..4 {
        let mut waited = 0;
        loop {
            f.clock.advance(Duration::from_secs(1));
            waited += 1;
            assert!(waited <= 10, "interval must never exceed the maximum");
            match f.cache.get(&Lookup("a")) {
                Err(CacheError::RetrySuppressed(_)) => continue,
                Err(CacheError::Fetch(_)) => break,
                other => panic!("unexpected result {other:?}"),
            }
        }
        eligible.push((f.clock.now() - start).as_secs());
    }
    assert_eq!(eligible, vec![1, 3, 7, 15]);
    assert_eq!(f.origin.calls(), 5);

    // Success resets the sequence: the next failure waits the initial interval again.
    f.clock.advance(Duration::from_secs(10));
    f.cache.set_expiration_policy(DurationSinceFetch::with_allow_expired_result(
        Duration::from_secs(1),
        false,
    ));
    f.origin.set_failing(false);
    f.cache.get(&Lookup("a")).unwrap();

    f.clock.advance(Duration::from_secs(1));
    f.origin.set_failing(true);
    assert!(matches!(f.cache.get(&Lookup("a")), Err(CacheError::Fetch(_))));
    f.clock.advance(Duration::from_secs(1));
    assert!(matches!(f.cache.get(&Lookup("a")), Err(CacheError::Fetch(_))));
}

#[test]
fn test_uncapped_backoff_reports_failure_then_suppresses() {
    let f = fixture();
    f.cache.set_fetch_retry_policy(
        ExponentialBackoff::new(Duration::MAX, Duration::MAX).unwrap(),
    );
    f.origin.set_failing(true);

    assert_eq!(
        f.cache.get(&Lookup("a")).unwrap_err().fetch_error(),
        &OriginError(1)
    );
    f.clock.advance(Duration::from_secs(86_400 * 365));
    assert!(matches!(
        f.cache.get(&Lookup("a")),
        Err(CacheError::RetrySuppressed(_))
    ));
    assert_eq!(f.origin.calls(), 1);

    // Insert still replaces the remembered error.
    f.cache.insert(Lookup("a"), Arc::new("seeded".to_string()));
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "seeded");
}

// ============================================================================
// PURGE / INSERT / BULK OPERATIONS
// ============================================================================

#[test]
fn test_purge_returns_value_and_forgets_key() {
    let f = fixture();
    let v = f.cache.get(&Lookup("a")).unwrap();
    let purged = f.cache.purge(&Lookup("a")).unwrap();
    assert!(Arc::ptr_eq(&v, &purged));
    assert!(!f.cache.contains_key(&Lookup("a")));
    assert_eq!(f.cache.purge(&Lookup("a")), None);

    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "a#2");
}

#[test]
fn test_insert_seeds_without_fetching() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(5)));
    f.cache.insert(Lookup("a"), Arc::new("seeded".to_string()));

    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "seeded");
    assert_eq!(f.origin.calls(), 0);

    // Inserted values age like fetched ones.
    f.clock.advance(Duration::from_secs(5));
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "a#1");
}

#[test]
fn test_insert_clears_remembered_error() {
    let f = fixture();
    f.cache.set_fetch_retry_policy(
        ExponentialBackoff::new(Duration::from_secs(60), Duration::from_secs(60)).unwrap(),
    );
    f.origin.set_failing(true);
    assert!(f.cache.get(&Lookup("a")).is_err());
    assert!(f.cache.get(&Lookup("a")).unwrap_err().is_retry_suppressed());

    f.cache.insert(Lookup("a"), Arc::new("manual".to_string()));
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "manual");
}

#[test]
fn test_purge_all_leaves_nothing_to_fall_back_on() {
    let f = fixture();
    f.cache.get(&Lookup("a")).unwrap();
    f.cache.get(&Lookup("b")).unwrap();
    f.cache.purge_all();
    assert!(f.cache.is_empty());

    f.origin.set_failing(true);
    assert!(matches!(f.cache.get(&Lookup("a")), Err(CacheError::Fetch(_))));
    assert_eq!(f.cache.fetch_metrics().purges, 2);
}

#[test]
fn test_expire_all_keeps_values_for_fallback() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(60)));
    let a = f.cache.get(&Lookup("a")).unwrap();
    f.cache.get(&Lookup("b")).unwrap();

    f.cache.expire_all();
    assert_eq!(f.cache.len(), 2);

    f.origin.set_failing(true);
    let served = f.cache.get(&Lookup("a")).unwrap();
    assert!(Arc::ptr_eq(&a, &served));

    f.origin.set_failing(false);
    assert_eq!(*f.cache.get(&Lookup("b")).unwrap(), "b#4");

    // Values fetched after expire_all are fresh.
    assert_eq!(*f.cache.get(&Lookup("b")).unwrap(), "b#4");
}

#[test]
fn test_expire_all_does_not_visit_slots() {
    let f = fixture();
    let journal = Arc::new(Journal::default());
    f.cache
        .set_expiration_policy(RecordingExpiration(journal.clone()));
    f.cache.insert(Lookup("a"), Arc::new("x".to_string()));
    f.cache.insert(Lookup("b"), Arc::new("y".to_string()));
    journal.take();

    f.cache.expire_all();
    assert_eq!(journal.take(), vec!["expiration.expire_all"]);
}

// ============================================================================
// POLICY REPLACEMENT
// ============================================================================

#[test]
fn test_value_policy_store_and_retrieve() {
    let f = fixture();
    f.cache.set_value_policy(MapValuePolicy::new(
        |v: Arc<String>| Arc::new(v.to_uppercase()),
        |v: &Arc<String>| Arc::new(format!("<{v}>")),
    ));

    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "<A#1>");
    f.cache.insert(Lookup("b"), Arc::new("seed".to_string()));
    assert_eq!(*f.cache.get(&Lookup("b")).unwrap(), "<SEED>");
    assert_eq!(*f.cache.purge(&Lookup("b")).unwrap(), "SEED");
}

#[test]
fn test_reset_restores_defaults() {
    let f = fixture();
    f.cache
        .set_expiration_policy(DurationSinceFetch::new(Duration::from_secs(1)));
    f.cache.set_fetch_retry_policy(AlwaysRetry);
    f.cache.get(&Lookup("a")).unwrap();

    f.cache.reset_expiration_policy();
    f.clock.advance(Duration::from_secs(100));
    f.cache.get(&Lookup("a")).unwrap();
    assert_eq!(f.origin.calls(), 1, "default policy never expires");

    f.cache.set_value_policy(MapValuePolicy::new(
        |v: Arc<String>| v,
        |_: &Arc<String>| Arc::new("masked".to_string()),
    ));
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "masked");
    f.cache.reset_value_policy();
    assert_eq!(*f.cache.get(&Lookup("a")).unwrap(), "a#1");

    f.cache.reset_fetch_retry_policy();
    assert!(format!("{:?}", f.cache.fetch_retry_policy()).contains("AlwaysRetry"));
    assert!(format!("{:?}", f.cache.expiration_policy()).contains("NeverExpire"));
}

#[test]
fn test_shared_policy_instance() {
    let f = fixture();
    let policy: Arc<dyn ExpirationPolicy> = Arc::new(NeverExpire);
    f.cache.set_shared_expiration_policy(policy.clone());
    assert!(Arc::ptr_eq(&policy, &f.cache.expiration_policy()));
}
