//! Error types for the allocator service.
//!
//! [`Error`] wraps everything the service can fail with and converts into
//! [`tonic::Status`] so handlers can use `?` all the way to the wire. The
//! reverse direction, a `Status` arriving at a client, becomes
//! [`flake::Error::Rpc`] via [`status_to_error`].

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the allocator service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The allocator or its coordination store failed.
    #[error("{0}")]
    Flake(#[from] flake::Error),

    /// The client request was invalid or exceeded constraints.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Flake(e) => flake_status(e),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("service is shutting down"),
        }
    }
}

fn flake_status(err: flake::Error) -> Status {
    use flake::Error as E;

    let message = err.to_string();
    match err {
        E::InvalidRequest { .. } => Status::invalid_argument(message),
        E::StoreUnavailable { .. } | E::Rpc { .. } => Status::unavailable(message),
        // Conflicts are retried internally and only escape on a bug.
        E::VersionConflict { .. } | E::AlreadyExists { .. } => Status::aborted(message),
        E::EncodingOverflow { .. } => Status::resource_exhausted(message),
        E::CorruptValue { .. } => Status::data_loss(message),
        _ => Status::internal(message),
    }
}

/// Folds a gRPC status received by a client into [`flake::Error::Rpc`].
pub fn status_to_error(status: &Status) -> flake::Error {
    flake::Error::Rpc {
        context: format!("{:?}: {}", status.code(), status.message()),
    }
}
