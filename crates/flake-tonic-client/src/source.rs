use flake_tonic_core::{
    flake::{Error, Result, SegmentRange, SegmentSource},
    proto::{FetchRequest, allocator_client::AllocatorClient},
    status_to_error,
};
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Endpoint},
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A [`SegmentSource`] that calls a remote allocator over gRPC.
#[derive(Clone, Debug)]
pub struct GrpcSource {
    client: AllocatorClient<Channel>,
}

impl GrpcSource {
    /// Connects to the allocator at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the endpoint is malformed or unreachable.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::Rpc {
                context: format!("invalid endpoint `{endpoint}`: {e}"),
            })?
            .connect()
            .await
            .map_err(|e| Error::Rpc {
                context: format!("cannot connect to `{endpoint}`: {e}"),
            })?;
        Ok(Self::new(channel))
    }

    pub fn new(channel: Channel) -> Self {
        let client = AllocatorClient::new(channel)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip);
        Self { client }
    }
}

impl SegmentSource for GrpcSource {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    async fn fetch(
        &self,
        service_name: &str,
        container_name: &str,
        need_count: u32,
    ) -> Result<Vec<SegmentRange>> {
        let need = i32::try_from(need_count).map_err(|_| Error::InvalidRequest {
            reason: format!("need count {need_count} does not fit the wire format"),
        })?;

        let mut client = self.client.clone();
        let reply = client
            .fetch(FetchRequest {
                service_name: service_name.to_string(),
                container_name: container_name.to_string(),
                need_count: need,
            })
            .await
            .map_err(|status| status_to_error(&status))?
            .into_inner();

        let ranges = reply.into_ranges()?;
        let total: u64 = ranges.iter().map(SegmentRange::len).sum();
        if total != u64::from(need_count) {
            return Err(Error::Rpc {
                context: format!("allocator returned {total} ids, asked for {need_count}"),
            });
        }
        Ok(ranges)
    }
}
