//! Error types shared by the allocator, the coordination store adapters, and
//! the client segment cache.
//!
//! Two families of errors exist:
//!
//! - **Optimistic conflicts** ([`Error::VersionConflict`],
//!   [`Error::AlreadyExists`]) are expected, short-lived races against another
//!   writer of the same key. The registry and the segment allocator retry them
//!   internally; see [`Error::is_conflict`].
//! - **Everything else** is surfaced to the caller unchanged.

/// A result type defaulting to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Identifies which bit field of a [`FlakeId`] a value was destined for.
///
/// [`FlakeId`]: crate::FlakeId
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Service,
    Container,
    Sequence,
}

impl core::fmt::Display for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Service => f.write_str("service id"),
            Self::Container => f.write_str("container id"),
            Self::Sequence => f.write_str("sequence id"),
        }
    }
}

/// All errors `flake` can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The coordination store could not be reached or rejected the request for
    /// a reason other than an optimistic conflict.
    #[error("coordination store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// A compare-and-swap lost against a concurrent writer.
    #[error("version conflict on `{key}`")]
    VersionConflict { key: String },

    /// A create-if-absent found the key already present.
    #[error("key `{key}` already exists")]
    AlreadyExists { key: String },

    /// A key that must exist was not found.
    #[error("key `{key}` not found")]
    KeyNotFound { key: String },

    /// A stored value could not be parsed as an integer.
    #[error("corrupt value `{value}` stored under `{key}`")]
    CorruptValue { key: String, value: String },

    /// The allocator could not be reached, or answered with an error.
    #[error("allocator rpc failed: {context}")]
    Rpc { context: String },

    /// A component does not fit its bit field.
    #[error("{field} {value} exceeds the maximum of {max}")]
    EncodingOverflow { field: Field, value: u64, max: u64 },

    /// The request was malformed or exceeded limits.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl Error {
    /// Returns `true` for lost optimistic races, which callers retry.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::AlreadyExists { .. })
    }

    pub(crate) fn corrupt(key: &str, value: impl Into<String>) -> Self {
        Self::CorruptValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}
