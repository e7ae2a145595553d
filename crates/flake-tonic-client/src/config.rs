use core::num::NonZeroU32;
use flake_tonic_core::{DEFAULT_ENDPOINT, flake::DEFAULT_TARGET_BUFFER_SIZE};

/// Settings for [`Client::connect`](crate::Client::connect).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Allocator endpoint, e.g. `http://127.0.0.1:30001`.
    pub endpoint: String,
    /// Refill in the background once a service's buffer drops below half its
    /// target size.
    pub prefetch: bool,
    /// Ids requested per refill, unless overridden per service with
    /// [`Client::set_target_buffer_size`](crate::Client::set_target_buffer_size).
    pub target_buffer_size: NonZeroU32,
    /// Identity reported to the allocator. `None` detects it from
    /// `/proc/self/cgroup`; see [`detect_container_name`](crate::detect_container_name).
    pub container_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            prefetch: true,
            target_buffer_size: DEFAULT_TARGET_BUFFER_SIZE,
            container_name: None,
        }
    }
}
