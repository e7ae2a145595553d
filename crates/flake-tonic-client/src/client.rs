use crate::{ClientConfig, GrpcSource, detect_container_name};
use core::num::NonZeroU32;
use flake_tonic_core::flake::{
    CacheConfig, Error, FlakeId, Result, SegmentCache, SegmentSource,
};
use std::sync::Arc;

/// Generates unique 64-bit ids from buffered allocator segments.
///
/// One client per process is enough; it is safe to share behind an [`Arc`]
/// and call from many tasks at once. Each service name gets its own buffer.
pub struct Client<S = GrpcSource> {
    cache: SegmentCache<S>,
}

impl Client<GrpcSource> {
    /// Connects to the allocator named in `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if the target buffer size does not fit the
    ///   wire format.
    /// - [`Error::Rpc`] if the endpoint cannot be reached.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        validate_target(config.target_buffer_size.get())?;
        let source = GrpcSource::connect(&config.endpoint).await?;
        Ok(Self::with_source(source, config))
    }
}

impl<S: SegmentSource> Client<S> {
    /// Builds a client over any [`SegmentSource`], e.g. an in-process
    /// [`SegmentAllocator`](flake_tonic_core::flake::SegmentAllocator).
    pub fn with_source(source: S, config: ClientConfig) -> Self {
        let container_name = config
            .container_name
            .unwrap_or_else(detect_container_name);

        #[cfg(feature = "tracing")]
        tracing::info!(container = %container_name, "flake client ready");

        let cache = SegmentCache::new(
            Arc::new(source),
            container_name,
            CacheConfig {
                prefetch: config.prefetch,
                target_buffer_size: config.target_buffer_size,
            },
        );
        Self { cache }
    }

    /// Returns a new id for `service_name`, unique across every client of the
    /// same allocator cluster.
    ///
    /// Served from memory unless the service's buffer is empty, in which case
    /// this waits for a refill. No id is returned on any error path.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the synchronous refill fails.
    /// - [`Error::EncodingOverflow`] if the allocator handed out a component
    ///   that does not fit the id layout.
    pub async fn generate_id(&self, service_name: &str) -> Result<i64> {
        self.generate_flake_id(service_name).await.map(i64::from)
    }

    /// Like [`Self::generate_id`], keeping the decoded components.
    pub async fn generate_flake_id(&self, service_name: &str) -> Result<FlakeId> {
        self.cache.next_id(service_name).await
    }

    /// Sets how many ids later refills for `service_name` request. Ids
    /// already buffered are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `size` is zero or larger than the
    /// wire format allows.
    pub fn set_target_buffer_size(&self, service_name: &str, size: u32) -> Result<()> {
        let size = validate_target(size)?;
        self.cache.set_target_buffer_size(service_name, size);
        Ok(())
    }

    /// Ids currently buffered for `service_name`.
    pub fn buffered(&self, service_name: &str) -> u64 {
        self.cache.buffered(service_name)
    }

    pub fn container_name(&self) -> &str {
        self.cache.container_name()
    }

    /// Shuts the client down. Buffered ids are discarded and never reused.
    /// The connection closes once any in-flight read-ahead finishes.
    pub fn close(self) {
        self.cache.clear();
    }
}

fn validate_target(size: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(size)
        .filter(|n| n.get() <= i32::MAX as u32)
        .ok_or_else(|| Error::InvalidRequest {
            reason: format!("target buffer size must be within 1..={}, got {size}", i32::MAX),
        })
}

impl<S> core::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client").field("cache", &self.cache).finish()
    }
}
