//! Client-side segment cache.
//!
//! Buffers ranges fetched from an allocator, one node per service name, and
//! serves ids from memory. In steady state [`SegmentCache::next_id`] never
//! waits on the network:
//!
//! - Consumption is guarded by a short, memory-only lock per node.
//! - Refills are single-flighted per node. Callers that find the node empty
//!   queue up behind the in-flight refill instead of issuing their own.
//! - With read-ahead enabled, the take that drops a node below half its target
//!   size spawns a background refill. Its outcome is observed only through the
//!   node's state; a failed read-ahead just releases the slot, and the next
//!   empty take refills synchronously.
//!
//! No cancellation or timeout exists at this layer. A hung [`SegmentSource`]
//! hangs the callers that are waiting on it.

mod node;
#[cfg(test)]
mod tests;

pub use node::Taken;

use crate::{
    allocator::{SegmentAllocator, SegmentRange},
    error::Result,
    id::FlakeId,
    store::CoordinationStore,
};
use core::{future::Future, num::NonZeroU32};
use node::CacheNode;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Default number of ids requested per refill.
pub const DEFAULT_TARGET_BUFFER_SIZE: NonZeroU32 = NonZeroU32::MIN.saturating_add(999);

/// Anything that can serve the allocator's `Fetch` operation.
pub trait SegmentSource: Send + Sync + 'static {
    /// Reserves exactly `need_count` ids for `container_name` under
    /// `service_name`, as one or more ordered ranges.
    fn fetch(
        &self,
        service_name: &str,
        container_name: &str,
        need_count: u32,
    ) -> impl Future<Output = Result<Vec<SegmentRange>>> + Send;
}

impl<S: CoordinationStore> SegmentSource for SegmentAllocator<S> {
    fn fetch(
        &self,
        service_name: &str,
        container_name: &str,
        need_count: u32,
    ) -> impl Future<Output = Result<Vec<SegmentRange>>> + Send {
        SegmentAllocator::fetch(self, service_name, container_name, need_count)
    }
}

impl<T: SegmentSource> SegmentSource for Arc<T> {
    fn fetch(
        &self,
        service_name: &str,
        container_name: &str,
        need_count: u32,
    ) -> impl Future<Output = Result<Vec<SegmentRange>>> + Send {
        (**self).fetch(service_name, container_name, need_count)
    }
}

/// Tunables for a [`SegmentCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Refill in the background once a node drops below half its target.
    pub prefetch: bool,
    /// Ids requested per refill for nodes without an explicit size.
    pub target_buffer_size: NonZeroU32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefetch: true,
            target_buffer_size: DEFAULT_TARGET_BUFFER_SIZE,
        }
    }
}

/// Why a refill was started. A demand refill is skipped when anything is
/// buffered; a read-ahead refill is skipped when the node is already back
/// above its low-water mark. A skipped refill still releases the read-ahead
/// slot, since any read-ahead spawned in the meantime re-checks before it
/// fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Refill {
    Demand,
    ReadAhead,
}

/// Per-process registry of cache nodes, keyed by service name plus this
/// process's container name.
pub struct SegmentCache<S> {
    source: Arc<S>,
    container_name: Arc<str>,
    config: CacheConfig,
    nodes: Mutex<HashMap<String, Arc<CacheNode>>>,
}

impl<S: SegmentSource> SegmentCache<S> {
    pub fn new(source: Arc<S>, container_name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        Self {
            source,
            container_name: container_name.into(),
            config,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the next unique id for `service_name`.
    ///
    /// # Errors
    ///
    /// - Any error from the synchronous refill when nothing is buffered.
    /// - [`Error::EncodingOverflow`](crate::Error::EncodingOverflow) if the
    ///   allocator handed out a component that does not fit the [`FlakeId`]
    ///   layout.
    pub async fn next_id(&self, service_name: &str) -> Result<FlakeId> {
        let taken = self.take(service_name).await?;
        FlakeId::try_from_components(taken.service_id, taken.container_id, taken.sequence_id)
    }

    /// Takes one sequence value for `service_name`, refilling synchronously if
    /// the node is empty.
    ///
    /// # Errors
    ///
    /// Returns the refill error as-is. A failed refill is not retried here.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn take(&self, service_name: &str) -> Result<Taken> {
        let node = self.node(service_name);
        loop {
            if let Some(taken) = node.try_take(self.config.prefetch) {
                if taken.prefetch {
                    self.spawn_read_ahead(Arc::clone(&node));
                }
                return Ok(taken);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(service = service_name, "buffer empty, refilling");
            refill(&*self.source, &self.container_name, &node, Refill::Demand).await?;
        }
    }

    /// Sets the number of ids requested by subsequent refills for
    /// `service_name`. Already-buffered ranges are unaffected.
    pub fn set_target_buffer_size(&self, service_name: &str, size: NonZeroU32) {
        let node = self.node(service_name);
        node.state.lock().target = size.get();
    }

    /// Ids currently buffered for `service_name`.
    pub fn buffered(&self, service_name: &str) -> u64 {
        self.nodes
            .lock()
            .get(&self.key(service_name))
            .map_or(0, |node| node.state.lock().remaining)
    }

    /// Drops every node. Unused buffered ids are discarded, never reused.
    pub fn clear(&self) {
        self.nodes.lock().clear();
    }

    fn key(&self, service_name: &str) -> String {
        let mut key = String::with_capacity(service_name.len() + self.container_name.len());
        key.push_str(service_name);
        key.push_str(&self.container_name);
        key
    }

    fn node(&self, service_name: &str) -> Arc<CacheNode> {
        let key = self.key(service_name);
        let mut nodes = self.nodes.lock();
        let node = nodes.entry(key).or_insert_with(|| {
            Arc::new(CacheNode::new(
                service_name,
                self.config.target_buffer_size.get(),
            ))
        });
        Arc::clone(node)
    }

    fn spawn_read_ahead(&self, node: Arc<CacheNode>) {
        let source = Arc::clone(&self.source);
        let container_name = Arc::clone(&self.container_name);

        #[cfg(feature = "tracing")]
        tracing::debug!(service = %node.service_name, "read-ahead started");

        tokio::spawn(async move {
            if let Err(_e) = refill(&*source, &container_name, &node, Refill::ReadAhead).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(service = %node.service_name, error = %_e, "read-ahead failed");
            }
        });
    }
}

/// Fetches one target's worth of ids into `node`, unless the data it was
/// started for has already arrived.
///
/// The in-flight flag is cleared on every exit path.
async fn refill<S: SegmentSource>(
    source: &S,
    container_name: &str,
    node: &CacheNode,
    reason: Refill,
) -> Result<()> {
    let _flight = node.fetch.lock().await;

    let need_count = {
        let mut state = node.state.lock();
        let satisfied = match reason {
            Refill::Demand => !state.ranges.is_empty(),
            Refill::ReadAhead => !state.below_low_water(),
        };
        if satisfied {
            state.fetching = false;
            return Ok(());
        }
        state.fetching = true;
        state.target
    };

    match source
        .fetch(&node.service_name, container_name, need_count)
        .await
    {
        Ok(ranges) => {
            let mut state = node.state.lock();
            for range in ranges.into_iter().filter(|r| !r.is_empty()) {
                state.remaining += range.len();
                state.ranges.push_back(range);
            }
            state.fetching = false;
            Ok(())
        }
        Err(e) => {
            node.state.lock().fetching = false;
            Err(e)
        }
    }
}

impl<S> core::fmt::Debug for SegmentCache<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("container_name", &self.container_name)
            .field("config", &self.config)
            .field("nodes", &self.nodes.lock().len())
            .finish_non_exhaustive()
    }
}
