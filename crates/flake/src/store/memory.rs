use crate::{
    error::{Error, Result},
    store::{CoordinationStore, Version, Versioned, parse_value},
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Debug)]
struct Entry {
    value: String,
    mod_revision: Version,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    revision: Version,
}

impl State {
    fn put(&mut self, key: &str, value: String) -> Version {
        self.revision += 1;
        let mod_revision = self.revision;
        self.entries.insert(key.to_string(), Entry { value, mod_revision });
        mod_revision
    }
}

/// A linearizable in-process coordination store.
///
/// Every write bumps a store-wide revision, and each key remembers the
/// revision it was last modified at, which serves as its version token. All
/// operations take a single mutex, so they are trivially linearizable.
///
/// Useful for single-node deployments and as a test double for a networked
/// store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a raw string value unconditionally.
    pub fn put_raw(&self, key: &str, value: impl Into<String>) {
        self.state.lock().put(key, value.into());
    }

    /// Returns a sorted copy of every key and its raw value.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CoordinationStore for MemoryStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let state = self.state.lock();
        match state.entries.get(key) {
            None => Ok(None),
            Some(entry) => Ok(Some(Versioned {
                value: parse_value(key, &entry.value)?,
                version: entry.mod_revision,
            })),
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn create_if_absent(&self, key: &str, value: i64) -> Result<()> {
        let mut state = self.state.lock();
        if state.entries.contains_key(key) {
            return Err(Error::AlreadyExists {
                key: key.to_string(),
            });
        }
        state.put(key, value.to_string());
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn compare_and_swap(&self, key: &str, value: i64, expected: Version) -> Result<()> {
        let mut state = self.state.lock();
        match state.entries.get(key) {
            None => Err(Error::KeyNotFound {
                key: key.to_string(),
            }),
            Some(entry) if entry.mod_revision != expected => Err(Error::VersionConflict {
                key: key.to_string(),
            }),
            Some(_) => {
                state.put(key, value.to_string());
                Ok(())
            }
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    async fn atomic_add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut state = self.state.lock();
        let current = match state.entries.get(key) {
            None => 0,
            Some(entry) => parse_value(key, &entry.value)?,
        };
        let next = current.checked_add(delta).ok_or_else(|| Error::InvalidRequest {
            reason: format!("adding {delta} to `{key}` overflows"),
        })?;
        state.put(key, next.to_string());
        Ok(next)
    }
}
