//! Wire types shared by the allocator server and its clients.
//!
//! - [`proto`] - generated messages and service stubs.
//! - [`error`] - the server-side error type and its `Status` mapping.
//! - [`types`] - conversions between wire ranges and [`flake::SegmentRange`].

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

pub mod proto {
    tonic::include_proto!("flake");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("flake_descriptor");
}
