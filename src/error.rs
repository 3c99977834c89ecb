//! Error types.
//!
//! Three families of failure can reach a caller:
//!
//! | Type | Raised by | Meaning |
//! |------|-----------|---------|
//! | [`CacheError`] | `get` | the fetch failed, or a previous failure is still inside its retry window |
//! | [`ConfigError`] | policy constructors | an interval is negative, non-finite, or the backoff bounds are inverted |
//! | [`UsageError`] | registry and builder | a cache shape is unknown, registered twice, or paired with the wrong value type |
//!
//! Fetch errors stay typed. They are shared through [`Arc`] because one
//! failure is remembered by the slot and may be handed to many waiters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error returned by `get` on a keyed cache.
#[derive(Error)]
#[non_exhaustive]
pub enum CacheError<E>
where
    E: std::error::Error + 'static,
{
    /// The underlying fetch failed and no stale value could be served.
    #[error(transparent)]
    Fetch(Arc<E>),

    /// A previous fetch failed and the retry policy does not allow another
    /// attempt yet. The fetch was not invoked.
    #[error("fetch retry suppressed after previous failure: {0}")]
    RetrySuppressed(#[source] Arc<E>),
}

impl<E> CacheError<E>
where
    E: std::error::Error + 'static,
{
    /// The fetch error behind this failure, either fresh or remembered.
    pub fn fetch_error(&self) -> &E {
        match self {
            CacheError::Fetch(err) | CacheError::RetrySuppressed(err) => err,
        }
    }

    /// Returns `true` if no fetch was attempted for this call.
    pub fn is_retry_suppressed(&self) -> bool {
        matches!(self, CacheError::RetrySuppressed(_))
    }

    /// Returns the shared fetch error.
    pub fn into_inner(self) -> Arc<E> {
        match self {
            CacheError::Fetch(err) | CacheError::RetrySuppressed(err) => err,
        }
    }
}

impl<E> Clone for CacheError<E>
where
    E: std::error::Error + 'static,
{
    fn clone(&self) -> Self {
        match self {
            CacheError::Fetch(err) => CacheError::Fetch(Arc::clone(err)),
            CacheError::RetrySuppressed(err) => CacheError::RetrySuppressed(Arc::clone(err)),
        }
    }
}

impl<E> fmt::Debug for CacheError<E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Fetch(err) => f.debug_tuple("Fetch").field(err).finish(),
            CacheError::RetrySuppressed(err) => {
                f.debug_tuple("RetrySuppressed").field(err).finish()
            }
        }
    }
}

/// Invalid policy or cache configuration, reported at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// An interval given in seconds was below zero.
    #[error("{name} must not be negative, got {value}s")]
    NegativeInterval {
        /// Which parameter was rejected.
        name: &'static str,
        /// The rejected value, in seconds.
        value: f64,
    },

    /// An interval given in seconds was NaN, infinite, or too large to represent.
    #[error("{name} is not a representable duration: {value}s")]
    InvalidInterval {
        /// Which parameter was rejected.
        name: &'static str,
        /// The rejected value, in seconds.
        value: f64,
    },

    /// The backoff ceiling is below its starting interval.
    #[error("maximum backoff interval {max:?} is less than the initial interval {initial:?}")]
    MaxBelowInitial {
        /// Starting interval.
        initial: Duration,
        /// Ceiling.
        max: Duration,
    },
}

impl ConfigError {
    /// Converts a seconds value into a [`Duration`], rejecting negative and
    /// unrepresentable input.
    pub(crate) fn duration_from_secs(name: &'static str, value: f64) -> Result<Duration, Self> {
        if value < 0.0 {
            return Err(ConfigError::NegativeInterval { name, value });
        }
        Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidInterval { name, value })
    }
}

/// Misuse of the registry or its builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UsageError {
    /// No cache is registered under the given shape.
    #[error("no cache is registered for shape `{0}`")]
    UnknownShape(String),

    /// Two caches were registered under the same shape.
    #[error("a cache is already registered for shape `{0}`")]
    DuplicateShape(String),

    /// A value policy or typed lookup named a value type the cache does not store.
    #[error("cache `{shape}` stores `{actual}` values, not `{expected}`")]
    ValueTypeMismatch {
        /// Shape of the cache that was addressed.
        shape: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type the cache actually stores.
        actual: &'static str,
    },

    /// A typed lookup asked for a cache type other than the one registered.
    #[error("cache `{shape}` is not a `{requested}`")]
    CacheTypeMismatch {
        /// Shape of the cache that was addressed.
        shape: String,
        /// Cache type the caller asked for.
        requested: &'static str,
    },
}
