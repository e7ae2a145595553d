//! gRPC service implementation.
//!
//! - [`handler`] - gRPC service entry point (`AllocatorService`).

pub mod handler;
