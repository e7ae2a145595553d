#![doc = include_str!("../README.md")]

mod allocator;
mod cache;
mod error;
mod id;
mod registry;
mod store;

pub use crate::allocator::*;
pub use crate::cache::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::registry::*;
pub use crate::store::*;
