//! The allocator's core: reserving disjoint sequence ranges from a per
//! `(service_id, container_id)` high-water mark.
//!
//! The allocator itself is stateless. Any number of allocators, in any number
//! of processes, may serve the same store concurrently; they coordinate only
//! through the store's conditional writes.
//!
//! ## Counter lifecycle
//!
//! ```text
//! Absent --create--> Active(V) --cas--> Active(V') --...--> Exhausted(max)
//! ```
//!
//! `Exhausted` is terminal for a key. The only way forward is a new container
//! id, which is a different key. The old key is orphaned, not deleted.
//!
//! ## Range convention
//!
//! The stored value is the last sequence number already handed out. Ranges
//! are inclusive on both ends, so a new counter reserves `[1, n]` and stores
//! `n`, and an existing counter at `V` reserves `[V + 1, V + n]`.

mod segment;

pub use segment::*;

use crate::{
    error::{Error, Result},
    id::FlakeId,
    registry::IdentityRegistry,
    store::{CoordinationStore, Keyspace, Namespace},
};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Service id used for requests that carry no service name. It sits below
/// every minted id, so it never collides with a named service.
pub const DEFAULT_SERVICE_ID: u32 = 1;

/// Default key prefix in the coordination store.
pub const DEFAULT_PREFIX: &str = "/flake";

/// Tunables for a [`SegmentAllocator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Path prefix for every key the allocator touches.
    pub prefix: String,
    /// Highest sequence number that may be handed out for one container id.
    ///
    /// Defaults to [`FlakeId::max_sequence_id`]. Lower values only make sense
    /// for exercising container reassignment.
    pub max_sequence: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            max_sequence: FlakeId::max_sequence_id(),
        }
    }
}

/// Hands out non-overlapping sequence ranges.
pub struct SegmentAllocator<S> {
    store: Arc<S>,
    registry: IdentityRegistry<S>,
    keys: Keyspace,
    max_sequence: u32,
}

impl<S> Clone for SegmentAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            keys: self.keys.clone(),
            max_sequence: self.max_sequence,
        }
    }
}

impl<S: CoordinationStore> SegmentAllocator<S> {
    /// Creates an allocator and bootstraps the id counters in `store`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `max_sequence` is zero or wider than the
    ///   [`FlakeId`] sequence field.
    /// - Any store error raised while bootstrapping.
    pub async fn open(store: Arc<S>, config: AllocatorConfig) -> Result<Self> {
        if config.max_sequence == 0 || config.max_sequence > FlakeId::max_sequence_id() {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "max sequence must be within 1..={}, got {}",
                    FlakeId::max_sequence_id(),
                    config.max_sequence
                ),
            });
        }

        let keys = Keyspace::new(&config.prefix);
        let registry = IdentityRegistry::new(Arc::clone(&store), keys.clone());
        registry.bootstrap().await?;

        Ok(Self {
            store,
            registry,
            keys,
            max_sequence: config.max_sequence,
        })
    }

    pub fn registry(&self) -> &IdentityRegistry<S> {
        &self.registry
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keys
    }

    pub const fn max_sequence(&self) -> u32 {
        self.max_sequence
    }

    /// Reserves up to `need_count` sequence numbers from the counter of
    /// `(service_id, container_id)`.
    ///
    /// If the request runs past the ceiling the range is clamped and
    /// `container_name` is given a fresh container id. If the counter is
    /// already at the ceiling nothing is reserved and
    /// [`Segment::Exhausted`] is returned after the reassignment. Lost races
    /// against concurrent allocators restart from the read.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `need_count` is zero.
    /// - [`Error::CorruptValue`] if the stored mark is outside `0..=max`.
    /// - Any non-conflict store or registry error.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn get_segment(
        &self,
        service_id: u32,
        container_id: u32,
        container_name: &str,
        need_count: u64,
    ) -> Result<Segment> {
        if need_count == 0 {
            return Err(Error::InvalidRequest {
                reason: "need count must be greater than 0".to_string(),
            });
        }

        let key = self.keys.sequence(service_id, container_id);
        let max = u64::from(self.max_sequence);

        loop {
            let current = self.store.get(&key).await?;
            let high_water = match current {
                None => 0,
                Some(read) => u64::try_from(read.value)
                    .ok()
                    .filter(|v| *v <= max)
                    .ok_or_else(|| Error::corrupt(&key, read.value.to_string()))?,
            };

            if high_water == max {
                // Handing out anything here would be an empty or invalid
                // range; move the container on and let the caller ask again.
                self.registry.reassign_container_id(container_name).await?;
                return Ok(Segment::Exhausted);
            }

            let wanted = high_water + need_count;
            let clamped = wanted > max;
            let end = wanted.min(max);

            let written = match current {
                None => self.store.create_if_absent(&key, end as i64).await,
                Some(read) => {
                    self.store
                        .compare_and_swap(&key, end as i64, read.version)
                        .await
                }
            };
            match written {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(key = %key, "sequence counter moved underneath us, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }

            // Both bounds are at most `max`, which fits a `u32`.
            let range = SegmentRange {
                service_id,
                container_id,
                start: (high_water + 1) as u32,
                end: end as u32,
            };

            if clamped {
                self.registry.reassign_container_id(container_name).await?;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                service_id,
                container_id,
                start = range.start,
                end = range.end,
                clamped,
                "segment reserved"
            );
            return Ok(Segment::Reserved { range, clamped });
        }
    }

    /// Reserves exactly `need_count` sequence numbers for `container_name`
    /// under `service_name`, returned as one or more ordered ranges.
    ///
    /// More than one range comes back only when the container ran into the
    /// sequence ceiling mid-way and continued under a new container id. An
    /// empty `service_name` maps to [`DEFAULT_SERVICE_ID`] without a registry
    /// lookup.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `need_count` is zero.
    /// - Any error from [`IdentityRegistry`] or [`Self::get_segment`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn fetch(
        &self,
        service_name: &str,
        container_name: &str,
        need_count: u32,
    ) -> Result<Vec<SegmentRange>> {
        if need_count == 0 {
            return Err(Error::InvalidRequest {
                reason: "need count must be greater than 0".to_string(),
            });
        }

        let service_id = if service_name.is_empty() {
            DEFAULT_SERVICE_ID
        } else {
            self.registry
                .assign_id(Namespace::Service, service_name)
                .await?
        };

        let mut remaining = u64::from(need_count);
        let mut ranges = Vec::with_capacity(1);
        while remaining > 0 {
            // Resolved on every pass so a reassignment from the previous pass
            // is picked up.
            let container_id = self
                .registry
                .assign_id(Namespace::Container, container_name)
                .await?;

            match self
                .get_segment(service_id, container_id, container_name, remaining)
                .await?
            {
                Segment::Reserved { range, .. } => {
                    remaining -= range.len();
                    ranges.push(range);
                }
                Segment::Exhausted => {}
            }
        }
        Ok(ranges)
    }
}
