#![doc = include_str!("../README.md")]

mod client;
mod config;
mod container;
mod source;

pub use crate::client::*;
pub use crate::config::*;
pub use crate::container::*;
pub use crate::source::*;
// Public re-export so callers can name ids and errors without another
// dependency.
pub use flake_tonic_core::flake;
