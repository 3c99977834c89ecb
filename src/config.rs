//! Keyed cache configuration.
//!
//! A cache is named by its *shape*, the call it memoizes (for example
//! `"UserService::get_user(u32)"`). Registries address caches by shape.
//!
//! # Examples
//!
//! ```
//! use keyed_cache::config::KeyedCacheConfig;
//! use keyed_cache::clock::ManualClock;
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//!
//! // Defaults: system clock, segment count based on CPU count
//! let config = KeyedCacheConfig::new("users::by_id");
//!
//! // Tests usually pin the clock
//! let clock = Arc::new(ManualClock::new());
//! let config = KeyedCacheConfig::new("users::by_id")
//!     .with_segments(NonZeroUsize::new(8).unwrap())
//!     .with_clock(clock);
//! assert_eq!(config.segments().get(), 8);
//! ```

use crate::clock::{Clock, SystemClock};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Returns the default number of segments based on available parallelism.
pub fn default_segment_count() -> NonZeroUsize {
    let count = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(16)
        .clamp(4, 64);
    NonZeroUsize::new(count).unwrap_or(NonZeroUsize::MIN)
}

/// Configuration for one keyed cache.
///
/// # Required Parameters
///
/// - `shape`: name of the call the cache memoizes (set in constructor)
///
/// # Optional Parameters (Builder Methods)
///
/// - `segments`: number of independently locked key-map segments (default: based on CPU count)
/// - `clock`: time source shared with the cache's policies (default: [`SystemClock`])
#[derive(Clone)]
pub struct KeyedCacheConfig {
    shape: String,
    segments: NonZeroUsize,
    clock: Arc<dyn Clock>,
}

impl KeyedCacheConfig {
    /// Creates a configuration for the cache of `shape`.
    pub fn new(shape: impl Into<String>) -> Self {
        Self {
            shape: shape.into(),
            segments: default_segment_count(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the number of key-map segments.
    pub fn with_segments(mut self, segments: NonZeroUsize) -> Self {
        self.segments = segments;
        self
    }

    /// Sets the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The memoized call's name.
    pub fn shape(&self) -> &str {
        &self.shape
    }

    /// The number of key-map segments.
    pub fn segments(&self) -> NonZeroUsize {
        self.segments
    }

    /// The time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl fmt::Debug for KeyedCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCacheConfig")
            .field("shape", &self.shape)
            .field("segments", &self.segments)
            .field("clock", &self.clock)
            .finish()
    }
}
