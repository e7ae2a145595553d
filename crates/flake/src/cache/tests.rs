use crate::{
    AllocatorConfig, CacheConfig, Error, FlakeId, MemoryStore, SegmentAllocator, SegmentCache,
    SegmentRange, SegmentSource, error::Result,
};
use core::num::NonZeroU32;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Wraps an allocator and records every requested need count, optionally
/// holding each fetch open for `delay`.
struct RecordingSource {
    inner: SegmentAllocator<MemoryStore>,
    requests: Mutex<Vec<u32>>,
    delay: Duration,
}

impl RecordingSource {
    async fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO).await
    }

    async fn slow(delay: Duration) -> Arc<Self> {
        let allocator =
            SegmentAllocator::open(Arc::new(MemoryStore::new()), AllocatorConfig::default())
                .await
                .unwrap();
        Arc::new(Self {
            inner: allocator,
            requests: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn requests(&self) -> Vec<u32> {
        self.requests.lock().clone()
    }
}

impl SegmentSource for RecordingSource {
    async fn fetch(
        &self,
        service_name: &str,
        container_name: &str,
        need_count: u32,
    ) -> Result<Vec<SegmentRange>> {
        self.requests.lock().push(need_count);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner
            .fetch(service_name, container_name, need_count)
            .await
    }
}

/// Serves fixed ranges until told to fail.
struct FlakySource {
    failing: AtomicBool,
    next: AtomicU32,
    calls: AtomicU32,
}

impl FlakySource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(false),
            next: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        })
    }
}

impl SegmentSource for FlakySource {
    async fn fetch(
        &self,
        _service_name: &str,
        _container_name: &str,
        need_count: u32,
    ) -> Result<Vec<SegmentRange>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Rpc {
                context: "connection refused".to_string(),
            });
        }
        let start = self.next.fetch_add(need_count, Ordering::SeqCst);
        Ok(vec![SegmentRange {
            service_id: 11,
            container_id: 11,
            start,
            end: start + need_count - 1,
        }])
    }
}

fn config(prefetch: bool, target: u32) -> CacheConfig {
    CacheConfig {
        prefetch,
        target_buffer_size: NonZeroU32::new(target).unwrap(),
    }
}

/// Gives spawned read-ahead tasks a chance to run to completion.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn sequential_ids_are_unique_and_increase_within_a_segment() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 10));

    let mut seen = HashSet::new();
    let mut previous: Option<FlakeId> = None;
    for _ in 0..10_000 {
        let id = cache.next_id("svc").await.unwrap();
        assert!(seen.insert(id), "duplicate id {id}");
        if let Some(prev) = previous {
            if prev.container_id() == id.container_id() {
                assert_eq!(id.sequence_id(), prev.sequence_id() + 1);
            }
        }
        previous = Some(id);
    }

    assert_eq!(source.requests().len(), 1000);
    assert!(source.requests().iter().all(|&n| n == 10));
}

#[tokio::test]
async fn first_id_comes_from_the_start_of_the_first_segment() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 5));

    let id = cache.next_id("svcA").await.unwrap();
    assert_eq!(
        (id.service_id(), id.container_id(), id.sequence_id()),
        (11, 11, 1)
    );
    assert_eq!(cache.buffered("svcA"), 4);
}

#[tokio::test]
async fn target_size_applies_to_the_next_refill() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 10));

    cache.next_id("svc").await.unwrap();
    cache.set_target_buffer_size("svc", NonZeroU32::new(3).unwrap());

    // Drain what is already buffered; the old segment is not resized.
    for _ in 0..9 {
        cache.next_id("svc").await.unwrap();
    }
    assert_eq!(source.requests(), vec![10]);

    cache.next_id("svc").await.unwrap();
    assert_eq!(source.requests(), vec![10, 3]);
    assert_eq!(cache.buffered("svc"), 2);
}

#[tokio::test]
async fn services_are_buffered_independently() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 4));

    let a = cache.next_id("a").await.unwrap();
    let b = cache.next_id("b").await.unwrap();
    assert_ne!(a.service_id(), b.service_id());
    assert_eq!(a.container_id(), b.container_id());
    assert_eq!(cache.buffered("a"), 3);
    assert_eq!(cache.buffered("b"), 3);
    assert_eq!(cache.buffered("c"), 0);
}

#[tokio::test]
async fn read_ahead_refills_before_the_buffer_runs_dry() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(true, 10));

    // 1 synchronous refill, then drop to 4 left, under the low-water mark of 5.
    for _ in 0..6 {
        cache.next_id("svc").await.unwrap();
    }
    settle().await;

    assert_eq!(source.requests(), vec![10, 10]);
    assert_eq!(cache.buffered("svc"), 14);

    // Everything up to the end of the read-ahead segment is served without
    // another round trip until the next low-water crossing.
    for _ in 0..4 {
        cache.next_id("svc").await.unwrap();
    }
    assert_eq!(source.requests().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_takes_on_an_empty_node_share_one_fetch() {
    let source = RecordingSource::slow(Duration::from_millis(50)).await;
    let cache = Arc::new(SegmentCache::new(Arc::clone(&source), "c1", config(true, 1000)));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.next_id("svc").await.unwrap() })
        })
        .collect();
    let ids: HashSet<FlakeId> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(ids.len(), 16);
    assert_eq!(source.requests(), vec![1000]);
    assert_eq!(cache.buffered("svc"), 984);
}

#[tokio::test]
async fn demand_refill_waits_behind_an_inflight_read_ahead() {
    let source = RecordingSource::slow(Duration::from_millis(50)).await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(true, 10));

    // The sixth take drops the node to 4 and spawns the read-ahead. Give it
    // time to take the refill lock, but not to finish.
    for _ in 0..6 {
        cache.next_id("svc").await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    for _ in 0..4 {
        cache.next_id("svc").await.unwrap();
    }
    assert_eq!(cache.buffered("svc"), 0);

    // Empty node: this take blocks on the read-ahead and is served from it.
    let next = cache.next_id("svc").await.unwrap();
    assert_eq!(next.sequence_id(), 11);
    assert_eq!(source.requests(), vec![10, 10]);
    assert_eq!(cache.buffered("svc"), 9);
}

#[tokio::test]
async fn skipped_refill_releases_the_read_ahead_slot() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 10));
    cache.next_id("svc").await.unwrap();

    let node = cache.node("svc");
    node.state.lock().fetching = true;
    super::refill(&*source, "c1", &node, super::Refill::Demand)
        .await
        .unwrap();

    assert!(!node.state.lock().fetching);
    assert_eq!(source.requests(), vec![10]);
    assert_eq!(cache.buffered("svc"), 9);
}

#[tokio::test]
async fn read_ahead_keeps_ids_unique() {
    let source = RecordingSource::new().await;
    let cache = Arc::new(SegmentCache::new(Arc::clone(&source), "c1", config(true, 16)));

    let mut seen = HashSet::new();
    for i in 0..2_000 {
        let id = cache.next_id("svc").await.unwrap();
        assert!(seen.insert(id), "duplicate id {id}");
        if i % 7 == 0 {
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn synchronous_refill_errors_reach_the_caller() {
    let source = FlakySource::new();
    source.failing.store(true, Ordering::SeqCst);
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 5));

    let err = cache.next_id("svc").await.unwrap_err();
    assert!(matches!(err, Error::Rpc { .. }));

    // The failure leaves nothing half-claimed; the next call simply retries.
    source.failing.store(false, Ordering::SeqCst);
    let id = cache.next_id("svc").await.unwrap();
    assert_eq!(id.sequence_id(), 1);
}

#[tokio::test]
async fn failed_read_ahead_releases_the_slot() {
    let source = FlakySource::new();
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(true, 4));

    // Fill, then take down to 1 left, claiming the read-ahead slot.
    cache.next_id("svc").await.unwrap();
    source.failing.store(true, Ordering::SeqCst);
    cache.next_id("svc").await.unwrap();
    cache.next_id("svc").await.unwrap();
    settle().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    // Buffered ids are still served, then the empty node refills on demand.
    source.failing.store(false, Ordering::SeqCst);
    let last = cache.next_id("svc").await.unwrap();
    assert_eq!(last.sequence_id(), 4);
    let refilled = cache.next_id("svc").await.unwrap();
    assert_eq!(refilled.sequence_id(), 5);
    settle().await;
    assert!(source.calls.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn clear_discards_buffered_ids() {
    let source = RecordingSource::new().await;
    let cache = SegmentCache::new(Arc::clone(&source), "c1", config(false, 10));

    let before = cache.next_id("svc").await.unwrap();
    cache.clear();
    assert_eq!(cache.buffered("svc"), 0);

    let after = cache.next_id("svc").await.unwrap();
    assert_eq!(after.sequence_id(), before.sequence_id() + 10);
    assert_eq!(source.requests(), vec![10, 10]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_callers_across_caches_never_collide() {
    let allocator = Arc::new(
        SegmentAllocator::open(
            Arc::new(MemoryStore::new()),
            AllocatorConfig {
                max_sequence: 700,
                ..AllocatorConfig::default()
            },
        )
        .await
        .unwrap(),
    );

    // Two processes sharing a container name, plus one on its own.
    let caches = [
        Arc::new(SegmentCache::new(Arc::clone(&allocator), "shared", config(true, 50))),
        Arc::new(SegmentCache::new(Arc::clone(&allocator), "shared", config(false, 37))),
        Arc::new(SegmentCache::new(Arc::clone(&allocator), "solo", config(true, 64))),
    ];

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let cache = Arc::clone(&caches[i % caches.len()]);
            tokio::spawn(async move {
                let mut ids = Vec::with_capacity(300);
                for _ in 0..300 {
                    ids.push(cache.next_id("svc").await.unwrap());
                }
                ids
            })
        })
        .collect();

    let ids: Vec<FlakeId> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    assert_eq!(ids.len(), 24 * 300);
    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "duplicate ids handed out");
    assert!(ids.iter().all(|id| (1..=700).contains(&id.sequence_id())));
}
