//! Stable small-integer identities for service and container names.
//!
//! Ids are minted from a namespace-wide counter and bound to a name with a
//! create-if-absent write. When two allocators race on the same unseen name,
//! exactly one binding wins; the loser's minted id is thrown away, never
//! reused. Ids are therefore unique per namespace but not dense.

use crate::{
    error::{Error, Field, Result},
    id::FlakeId,
    store::{CoordinationStore, Keyspace, Namespace, get_or_create},
};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Starting value of both id counters. Minted ids begin one above it, which
/// leaves the low ids free for fixed assignments such as
/// [`DEFAULT_SERVICE_ID`](crate::DEFAULT_SERVICE_ID).
pub const START_OF_IDS: i64 = 10;

/// Maps names to ids through a [`CoordinationStore`].
pub struct IdentityRegistry<S> {
    store: Arc<S>,
    keys: Keyspace,
}

impl<S> Clone for IdentityRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
        }
    }
}

impl<S: CoordinationStore> IdentityRegistry<S> {
    pub fn new(store: Arc<S>, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    /// Ensures both id counters exist, seeding them with [`START_OF_IDS`].
    ///
    /// Returns the current `(max service id, max container id)`.
    ///
    /// # Errors
    ///
    /// Propagates any store error.
    pub async fn bootstrap(&self) -> Result<(i64, i64)> {
        let service = get_or_create(
            &*self.store,
            &self.keys.max_id(Namespace::Service),
            START_OF_IDS,
        )
        .await?;
        let container = get_or_create(
            &*self.store,
            &self.keys.max_id(Namespace::Container),
            START_OF_IDS,
        )
        .await?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            max_service_id = service,
            max_container_id = container,
            "identity counters ready"
        );
        Ok((service, container))
    }

    /// Returns the id bound to `name`, binding a freshly minted one if the
    /// name has never been seen.
    ///
    /// # Errors
    ///
    /// - [`Error::EncodingOverflow`] if the namespace has run out of ids that
    ///   fit the [`FlakeId`] layout.
    /// - Any non-conflict store error. Conflicts are retried.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn assign_id(&self, namespace: Namespace, name: &str) -> Result<u32> {
        let key = self.keys.identity(namespace, name);
        loop {
            if let Some(current) = self.store.get(&key).await? {
                return to_identity(namespace, &key, current.value);
            }

            let candidate = self.mint(namespace).await?;
            match self.store.create_if_absent(&key, i64::from(candidate)).await {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(%namespace, name, id = candidate, "identity assigned");
                    return Ok(candidate);
                }
                Err(e) if e.is_conflict() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%namespace, name, burned = candidate, "lost identity race");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Binds a freshly minted container id to `container_name`, replacing the
    /// current one.
    ///
    /// The previous id's sequence counters become unreachable by name. They
    /// are left in place and never reused.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyNotFound`] if the name was never bound.
    /// - [`Error::EncodingOverflow`] if container ids are exhausted.
    /// - Any non-conflict store error. Conflicts are retried.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn reassign_container_id(&self, container_name: &str) -> Result<u32> {
        let key = self.keys.identity(Namespace::Container, container_name);
        let fresh = self.mint(Namespace::Container).await?;
        loop {
            let current = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| Error::KeyNotFound { key: key.clone() })?;
            match self
                .store
                .compare_and_swap(&key, i64::from(fresh), current.version)
                .await
            {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        container = container_name,
                        old = current.value,
                        new = fresh,
                        "container id reassigned"
                    );
                    return Ok(fresh);
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn mint(&self, namespace: Namespace) -> Result<u32> {
        let key = self.keys.max_id(namespace);
        let next = self.store.atomic_add(&key, 1).await?;
        to_identity(namespace, &key, next)
    }
}

fn to_identity(namespace: Namespace, key: &str, value: i64) -> Result<u32> {
    let (field, max) = match namespace {
        Namespace::Service => (Field::Service, FlakeId::max_service_id()),
        Namespace::Container => (Field::Container, FlakeId::max_container_id()),
    };
    let id = u32::try_from(value).map_err(|_| Error::corrupt(key, value.to_string()))?;
    if id > max {
        return Err(Error::EncodingOverflow {
            field,
            value: u64::from(id),
            max: u64::from(max),
        });
    }
    Ok(id)
}
