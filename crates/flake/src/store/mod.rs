//! The coordination store contract and its backends.
//!
//! The allocator keeps no state of its own. Every identity mapping and every
//! sequence high-water mark lives in a linearizable key-value store, and all
//! cross-allocator coordination happens through two conditional writes:
//! create-if-absent and compare-and-swap against a version token.
//!
//! Values are integers stored as their decimal string representation.

#[cfg(feature = "etcd")]
mod etcd;
mod keys;
mod memory;

#[cfg(feature = "etcd")]
pub use etcd::*;
pub use keys::*;
pub use memory::*;

use crate::error::Result;
use core::future::Future;
use std::sync::Arc;

/// Opaque token identifying the revision a value was read at.
pub type Version = u64;

/// A value together with the version it was read at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Versioned {
    pub value: i64,
    pub version: Version,
}

/// Contract over an external linearizable key-value store.
///
/// Implementations report lost optimistic races as
/// [`Error::AlreadyExists`](crate::Error::AlreadyExists) and
/// [`Error::VersionConflict`](crate::Error::VersionConflict); every other
/// failure is [`Error::StoreUnavailable`](crate::Error::StoreUnavailable) or
/// [`Error::CorruptValue`](crate::Error::CorruptValue).
pub trait CoordinationStore: Send + Sync + 'static {
    /// Point read. `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Versioned>>> + Send;

    /// Writes `value` only if `key` does not exist yet.
    fn create_if_absent(&self, key: &str, value: i64) -> impl Future<Output = Result<()>> + Send;

    /// Overwrites `key` only if it is still at `expected`.
    fn compare_and_swap(
        &self,
        key: &str,
        value: i64,
        expected: Version,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically adds `delta` and returns the new value. An absent key counts
    /// as zero.
    fn atomic_add(&self, key: &str, delta: i64) -> impl Future<Output = Result<i64>> + Send;
}

impl<S: CoordinationStore> CoordinationStore for Arc<S> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Versioned>>> + Send {
        (**self).get(key)
    }

    fn create_if_absent(&self, key: &str, value: i64) -> impl Future<Output = Result<()>> + Send {
        (**self).create_if_absent(key, value)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        value: i64,
        expected: Version,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).compare_and_swap(key, value, expected)
    }

    fn atomic_add(&self, key: &str, delta: i64) -> impl Future<Output = Result<i64>> + Send {
        (**self).atomic_add(key, delta)
    }
}

/// Reads `key`, creating it with `initial` if absent, and returns the stored
/// value.
///
/// # Errors
///
/// Propagates any non-conflict store error.
pub async fn get_or_create<S: CoordinationStore>(store: &S, key: &str, initial: i64) -> Result<i64> {
    loop {
        if let Some(current) = store.get(key).await? {
            return Ok(current.value);
        }
        match store.create_if_absent(key, initial).await {
            Ok(()) => return Ok(initial),
            Err(e) if e.is_conflict() => continue,
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn parse_value(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| crate::Error::corrupt(key, raw))
}
