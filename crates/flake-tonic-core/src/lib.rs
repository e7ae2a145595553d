#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can reach the core types through
// `flake_tonic_core::flake`
pub use flake;
