use crate::{
    error::{Error, Result},
    store::{CoordinationStore, Version, Versioned, parse_value},
};
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, Txn, TxnOp};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Connection settings for [`EtcdStore`].
#[derive(Clone, Debug, Default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Coordination store backed by an etcd v3 cluster.
///
/// The version token is the key's `mod_revision`. Create-if-absent and
/// compare-and-swap are single-compare transactions, so a lost race shows up
/// as an unsuccessful transaction rather than an error.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connects to the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if no endpoint can be reached.
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let options = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                Some(ConnectOptions::new().with_user(user.as_str(), password.as_str()))
            }
            _ => None,
        };
        let client = Client::connect(config.endpoints.clone(), options)
            .await
            .map_err(unavailable)?;
        Ok(Self { client })
    }

    /// Returns the version reported by the member we are connected to.
    pub async fn server_version(&self) -> Result<String> {
        let mut client = self.client.clone();
        let status = client.status().await.map_err(unavailable)?;
        Ok(status.version().to_string())
    }
}

fn unavailable(err: etcd_client::Error) -> Error {
    Error::StoreUnavailable {
        context: err.to_string(),
    }
}

impl CoordinationStore for EtcdStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(unavailable)?;
        let Some(kv) = resp.kvs().first() else {
            return Ok(None);
        };
        let raw = kv
            .value_str()
            .map_err(|_| Error::corrupt(key, String::from_utf8_lossy(kv.value())))?;
        Ok(Some(Versioned {
            value: parse_value(key, raw)?,
            version: kv.mod_revision() as Version,
        }))
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn create_if_absent(&self, key: &str, value: i64) -> Result<()> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when([Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key, value.to_string(), None)]);
        let resp = client.txn(txn).await.map_err(unavailable)?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(Error::AlreadyExists {
                key: key.to_string(),
            })
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn compare_and_swap(&self, key: &str, value: i64, expected: Version) -> Result<()> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when([Compare::mod_revision(key, CompareOp::Equal, expected as i64)])
            .and_then([TxnOp::put(key, value.to_string(), None)]);
        let resp = client.txn(txn).await.map_err(unavailable)?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(Error::VersionConflict {
                key: key.to_string(),
            })
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn atomic_add(&self, key: &str, delta: i64) -> Result<i64> {
        loop {
            let attempt = match self.get(key).await? {
                None => self.create_if_absent(key, delta).await.map(|()| delta),
                Some(current) => {
                    let next = current.value + delta;
                    self.compare_and_swap(key, next, current.version)
                        .await
                        .map(|()| next)
                }
            };
            match attempt {
                Ok(next) => return Ok(next),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// These run against a live cluster named by `ETCD_ENDPOINTS`
/// (comma-separated), e.g. `ETCD_ENDPOINTS=http://127.0.0.1:2379 cargo test
/// -p flake --features etcd -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use etcd_client::DeleteOptions;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Connected store plus a key prefix private to this test run.
    struct Scratch {
        store: EtcdStore,
        prefix: String,
    }

    impl Scratch {
        async fn new(name: &str) -> Self {
            let endpoints = std::env::var("ETCD_ENDPOINTS")
                .expect("ETCD_ENDPOINTS must name at least one etcd endpoint");
            let config = EtcdConfig {
                endpoints: endpoints.split(',').map(str::to_string).collect(),
                ..EtcdConfig::default()
            };
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            Self {
                store: EtcdStore::connect(&config).await.unwrap(),
                prefix: format!("/flake-test/{name}/{}-{nanos}", std::process::id()),
            }
        }

        fn key(&self, suffix: &str) -> String {
            format!("{}/{suffix}", self.prefix)
        }

        async fn cleanup(self) {
            let mut client = self.store.client.clone();
            client
                .delete(self.prefix, Some(DeleteOptions::new().with_prefix()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    #[ignore = "requires an etcd cluster at ETCD_ENDPOINTS"]
    async fn reports_server_version() {
        let scratch = Scratch::new("version").await;
        assert!(!scratch.store.server_version().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires an etcd cluster at ETCD_ENDPOINTS"]
    async fn create_if_absent_only_once() {
        let scratch = Scratch::new("create").await;
        let key = scratch.key("k");

        assert_eq!(scratch.store.get(&key).await.unwrap(), None);
        scratch.store.create_if_absent(&key, 5).await.unwrap();
        let err = scratch.store.create_if_absent(&key, 6).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(scratch.store.get(&key).await.unwrap().unwrap().value, 5);

        scratch.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "requires an etcd cluster at ETCD_ENDPOINTS"]
    async fn compare_and_swap_requires_current_revision() {
        let scratch = Scratch::new("cas").await;
        let key = scratch.key("k");

        scratch.store.create_if_absent(&key, 1).await.unwrap();
        let read = scratch.store.get(&key).await.unwrap().unwrap();
        scratch
            .store
            .compare_and_swap(&key, 2, read.version)
            .await
            .unwrap();
        let err = scratch
            .store
            .compare_and_swap(&key, 3, read.version)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict { .. }));

        let now = scratch.store.get(&key).await.unwrap().unwrap();
        assert_eq!(now.value, 2);
        assert!(now.version > read.version);

        scratch.cleanup().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    #[ignore = "requires an etcd cluster at ETCD_ENDPOINTS"]
    async fn concurrent_atomic_add_is_linearizable() {
        let scratch = Arc::new(Scratch::new("add").await);
        let key = scratch.key("n");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let scratch = Arc::clone(&scratch);
                let key = key.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::with_capacity(25);
                    for _ in 0..25 {
                        seen.push(scratch.store.atomic_add(&key, 1).await.unwrap());
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<i64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .flat_map(|r| r.unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=200).collect::<Vec<_>>());

        if let Ok(scratch) = Arc::try_unwrap(scratch) {
            scratch.cleanup().await;
        }
    }
}
