//! Allocator server internals.
//!
//! - [`config`] - CLI and environment configuration.
//! - [`store`] - runtime choice of coordination store backend.
//! - [`service`] - the gRPC `Allocator` service.
//! - [`telemetry`] - logging, tracing and metrics.

pub mod config;
pub mod service;
pub mod store;
pub mod telemetry;
