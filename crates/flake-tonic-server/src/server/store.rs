//! Runtime selection of the coordination store backend.

use crate::server::config::StoreConfig;
#[cfg(feature = "etcd")]
use flake_tonic_core::flake::EtcdStore;
use flake_tonic_core::flake::{CoordinationStore, MemoryStore, Result, Version, Versioned};

/// The backend chosen by `STORE_BACKEND`.
pub enum AnyStore {
    Memory(MemoryStore),
    #[cfg(feature = "etcd")]
    Etcd(EtcdStore),
}

impl AnyStore {
    /// Opens the configured backend.
    ///
    /// # Errors
    ///
    /// Fails if the etcd cluster cannot be reached.
    pub async fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        match config {
            StoreConfig::Memory => {
                #[cfg(feature = "tracing")]
                tracing::warn!("using the in-memory store; state is not shared or persisted");
                Ok(Self::Memory(MemoryStore::new()))
            }
            #[cfg(feature = "etcd")]
            StoreConfig::Etcd(etcd) => {
                let store = EtcdStore::connect(etcd).await?;
                let _version = store.server_version().await?;
                #[cfg(feature = "tracing")]
                tracing::info!(
                    endpoints = ?etcd.endpoints,
                    version = %_version,
                    "connected to etcd"
                );
                Ok(Self::Etcd(store))
            }
        }
    }

    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "etcd")]
            Self::Etcd(_) => "etcd",
        }
    }
}

impl CoordinationStore for AnyStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        match self {
            Self::Memory(store) => store.get(key).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(store) => store.get(key).await,
        }
    }

    async fn create_if_absent(&self, key: &str, value: i64) -> Result<()> {
        match self {
            Self::Memory(store) => store.create_if_absent(key, value).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(store) => store.create_if_absent(key, value).await,
        }
    }

    async fn compare_and_swap(&self, key: &str, value: i64, expected: Version) -> Result<()> {
        match self {
            Self::Memory(store) => store.compare_and_swap(key, value, expected).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(store) => store.compare_and_swap(key, value, expected).await,
        }
    }

    async fn atomic_add(&self, key: &str, delta: i64) -> Result<i64> {
        match self {
            Self::Memory(store) => store.atomic_add(key, delta).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(store) => store.atomic_add(key, delta).await,
        }
    }
}
