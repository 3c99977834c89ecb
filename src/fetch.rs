//! Cache keys and the fetches they are bound to.
//!
//! A key captures the arguments of one call and knows how to perform that call
//! against a source object. Two keys are equal when their arguments are, so
//! the cache can memoize by key alone.
//!
//! ```
//! use keyed_cache::Fetch;
//! use std::collections::HashMap;
//!
//! struct Directory {
//!     users: HashMap<u32, String>,
//! }
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! struct UserName(u32);
//!
//! #[derive(Debug)]
//! struct NotFound;
//!
//! impl std::fmt::Display for NotFound {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("user not found")
//!     }
//! }
//!
//! impl std::error::Error for NotFound {}
//!
//! impl Fetch<Directory> for UserName {
//!     type Output = String;
//!     type Error = NotFound;
//!
//!     fn fetch(&self, source: &Directory) -> Result<String, NotFound> {
//!         source.users.get(&self.0).cloned().ok_or(NotFound)
//!     }
//! }
//! ```

#[cfg(feature = "async")]
use futures::future::BoxFuture;
#[cfg(feature = "async")]
use std::sync::Arc;

/// A key whose value is produced by a blocking call on a source of type `S`.
pub trait Fetch<S: ?Sized> {
    /// The value produced by a successful fetch.
    type Output;

    /// The error produced by a failed fetch.
    type Error;

    /// Performs the call this key stands for.
    fn fetch(&self, source: &S) -> Result<Self::Output, Self::Error>;
}

/// A key whose value is produced by an asynchronous call on a source of type `S`.
///
/// The returned future owns everything it needs, since other callers may
/// keep awaiting it after the caller that started it has gone away.
#[cfg(feature = "async")]
pub trait AsyncFetch<S: ?Sized> {
    /// The value produced by a successful fetch.
    type Output;

    /// The error produced by a failed fetch.
    type Error;

    /// Starts the call this key stands for.
    fn fetch(&self, source: Arc<S>) -> BoxFuture<'static, Result<Self::Output, Self::Error>>;
}
