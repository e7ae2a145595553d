//! gRPC service implementation for segment allocation.
//!
//! [`AllocatorService`] implements the [`Allocator`] service from the protobuf
//! definition. Each `Fetch` is validated, forwarded to a shared
//! [`SegmentAllocator`], and answered with the reserved ranges.
//!
//! ## Responsibilities
//!
//! - Enforce `0 < need_count <= MAX_ALLOWED_IDS`.
//! - Refuse new work once shutdown has begun, and drain in-flight fetches.
//! - Emit request, error, allocation and latency telemetry.

use crate::server::{
    config::ServerConfig,
    telemetry::{
        decrement_fetches_inflight, increment_container_reassignments, increment_fetch_errors,
        increment_fetch_requests, increment_fetches_inflight, increment_sequences_allocated,
        record_fetch_duration, record_ranges_per_fetch,
    },
};
use core::time::Duration;
use flake_tonic_core::{
    Error,
    flake::{CoordinationStore, SegmentAllocator},
    proto::{FetchReply, FetchRequest, allocator_server::Allocator},
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tonic::{Request, Response, Status};

/// Shutdown flag and in-flight counter shared by every clone of the service.
#[derive(Default)]
struct Lifecycle {
    shutting_down: AtomicBool,
    inflight: AtomicUsize,
}

/// Decrements the in-flight count on every exit path of a fetch.
struct InflightGuard<'a>(&'a Lifecycle);

impl<'a> InflightGuard<'a> {
    fn enter(lifecycle: &'a Lifecycle) -> Self {
        lifecycle.inflight.fetch_add(1, Ordering::SeqCst);
        increment_fetches_inflight();
        Self(lifecycle)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.inflight.fetch_sub(1, Ordering::SeqCst);
        decrement_fetches_inflight();
    }
}

/// gRPC front end over a [`SegmentAllocator`].
pub struct AllocatorService<S> {
    allocator: SegmentAllocator<S>,
    max_allowed_ids: u32,
    lifecycle: Arc<Lifecycle>,
}

impl<S> Clone for AllocatorService<S> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
            max_allowed_ids: self.max_allowed_ids,
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<S: CoordinationStore> AllocatorService<S> {
    pub fn new(allocator: SegmentAllocator<S>, config: &ServerConfig) -> Self {
        Self::with_limit(allocator, config.max_allowed_ids)
    }

    pub fn with_limit(allocator: SegmentAllocator<S>, max_allowed_ids: u32) -> Self {
        Self {
            allocator,
            max_allowed_ids,
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    pub fn fetches_inflight(&self) -> usize {
        self.lifecycle.inflight.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lifecycle.shutting_down.load(Ordering::SeqCst)
    }

    /// Stops accepting fetches and waits up to `drain_timeout` for in-flight
    /// ones to finish.
    ///
    /// A fetch still running after the timeout is left to complete on its
    /// own; its reservation is already durable in the store.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.lifecycle.shutting_down.store(true, Ordering::SeqCst);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight fetches ({} active)",
            self.fetches_inflight()
        );
        let drained = timeout(drain_timeout, async {
            while self.fetches_inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight fetches drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} fetches still active)",
                    self.fetches_inflight()
                );
            }
        }
    }

    /// Registers a fetch as in flight, then checks the shutdown flag.
    ///
    /// The count is raised before the flag is read, so [`Self::shutdown`]
    /// either sees the fetch in flight or the fetch sees the flag.
    fn admit(&self) -> Result<InflightGuard<'_>, Error> {
        let guard = InflightGuard::enter(&self.lifecycle);
        if self.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }
        Ok(guard)
    }

    fn validate(&self, need_count: i32) -> Result<u32, Error> {
        let need = u32::try_from(need_count)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::InvalidRequest {
                reason: format!("need_count must be greater than 0, got {need_count}"),
            })?;
        if need > self.max_allowed_ids {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "need_count {} exceeds maximum allowed ({})",
                    need, self.max_allowed_ids
                ),
            });
        }
        Ok(need)
    }
}

#[tonic::async_trait]
impl<S: CoordinationStore> Allocator for AllocatorService<S> {
    /// Reserves `need_count` ids for the caller.
    ///
    /// If `metrics` is enabled, emits telemetry for:
    /// - request rate and errors
    /// - sequences allocated and ranges per reply
    /// - container reassignments observed as multi-range replies
    /// - fetch duration
    #[cfg_attr(feature = "tracing", tracing::instrument(
        skip_all,
        fields(
            service = %req.get_ref().service_name,
            container = %req.get_ref().container_name,
            need = req.get_ref().need_count,
        )
    ))]
    async fn fetch(&self, req: Request<FetchRequest>) -> Result<Response<FetchReply>, Status> {
        let start = std::time::Instant::now();

        let _inflight = self.admit().inspect_err(|_| increment_fetch_errors())?;

        let FetchRequest {
            service_name,
            container_name,
            need_count,
        } = req.into_inner();

        let need = self.validate(need_count).inspect_err(|_| increment_fetch_errors())?;

        increment_fetch_requests();

        let ranges = match self
            .allocator
            .fetch(&service_name, &container_name, need)
            .await
        {
            Ok(ranges) => ranges,
            Err(e) => {
                increment_fetch_errors();
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "fetch failed");
                return Err(Error::from(e).into());
            }
        };

        let reply = FetchReply::from_ranges(&ranges).map_err(Error::from)?;

        increment_sequences_allocated(u64::from(need));
        record_ranges_per_fetch(ranges.len() as f64);
        if ranges.len() > 1 {
            increment_container_reassignments((ranges.len() - 1) as u64);
        }
        record_fetch_duration(start.elapsed().as_secs_f64() * 1000.0);

        #[cfg(feature = "tracing")]
        tracing::debug!(ranges = ranges.len(), "fetch served");

        Ok(Response::new(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flake_tonic_core::flake::{AllocatorConfig, MemoryStore, SegmentRange};
    use tonic::Code;

    async fn service_with(max_sequence: u32, max_allowed_ids: u32) -> AllocatorService<MemoryStore> {
        let allocator = SegmentAllocator::open(
            Arc::new(MemoryStore::new()),
            AllocatorConfig {
                max_sequence,
                ..AllocatorConfig::default()
            },
        )
        .await
        .unwrap();
        AllocatorService::with_limit(allocator, max_allowed_ids)
    }

    async fn service() -> AllocatorService<MemoryStore> {
        service_with(AllocatorConfig::default().max_sequence, 1_000).await
    }

    fn request(service: &str, container: &str, need: i32) -> Request<FetchRequest> {
        Request::new(FetchRequest {
            service_name: service.to_string(),
            container_name: container.to_string(),
            need_count: need,
        })
    }

    #[tokio::test]
    async fn consecutive_fetches_are_adjacent() {
        let service = service().await;

        let first = service.fetch(request("svcA", "c1", 5)).await.unwrap();
        let first = &first.get_ref().items;
        assert_eq!(first.len(), 1);
        assert_eq!((first[0].sequence_id_start, first[0].sequence_id_end), (1, 5));

        let second = service.fetch(request("svcA", "c1", 3)).await.unwrap();
        let second = &second.get_ref().items;
        assert_eq!((second[0].sequence_id_start, second[0].sequence_id_end), (6, 8));
        assert_eq!(second[0].service_id, first[0].service_id);
        assert_eq!(second[0].container_id, first[0].container_id);
    }

    #[tokio::test]
    async fn overflow_returns_two_ranges() {
        let service = service_with(1024, 1_000).await;
        service.fetch(request("svc", "c1", 1000)).await.unwrap();

        let reply = service
            .fetch(request("svc", "c1", 1000))
            .await
            .unwrap()
            .into_inner();
        let ranges = reply.into_ranges().unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges.iter().map(SegmentRange::len).sum::<u64>(), 1000);
        assert_ne!(ranges[0].container_id, ranges[1].container_id);
    }

    #[tokio::test]
    async fn rejects_out_of_bounds_need_count() {
        let service = service().await;
        for need in [0, -3, 1_001] {
            let status = service.fetch(request("svc", "c", need)).await.unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument, "need {need}");
        }
        assert!(service.fetch(request("svc", "c", 1_000)).await.is_ok());
    }

    #[tokio::test]
    async fn refuses_work_after_shutdown() {
        let service = service().await;
        service.shutdown(Duration::from_millis(100)).await;
        assert!(service.is_shutting_down());

        let status = service.fetch(request("svc", "c", 1)).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(service.fetches_inflight(), 0);
    }

    #[tokio::test]
    async fn admission_counts_the_fetch_before_checking_shutdown() {
        let service = service().await;

        let admitted = service.admit().unwrap();
        assert_eq!(service.fetches_inflight(), 1);

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move { service.shutdown(Duration::from_secs(5)).await })
        };
        sleep(Duration::from_millis(60)).await;
        assert!(!waiter.is_finished(), "shutdown ignored an admitted fetch");

        assert!(matches!(service.admit(), Err(Error::ServiceShutdown)));
        assert_eq!(service.fetches_inflight(), 1);

        drop(admitted);
        waiter.await.unwrap();
        assert_eq!(service.fetches_inflight(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_inflight_fetches() {
        let service = service().await;
        let guard = InflightGuard::enter(&service.lifecycle);

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                service.shutdown(Duration::from_secs(5)).await;
                started.elapsed()
            })
        };

        sleep(Duration::from_millis(120)).await;
        drop(guard);

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_millis(100), "{waited:?}");
        assert!(waited < Duration::from_secs(5));
    }
}
