//! Bounded per-key version history.
//!
//! History is append-only: rolling back re-tracks the old data as a new
//! version. Version numbers keep increasing after the oldest entries have
//! been evicted.

use crate::config::VersionConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_storage::{KvStore, read_json, write_json};
use showcase_types::{Clock, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// One retained version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedData {
    pub data: Value,
    pub version: u64,
    pub timestamp: Timestamp,
}

/// Keeps the last `max_versions` values written under each key.
pub struct VersionTracker {
    histories: Mutex<HashMap<String, Vec<VersionedData>>>,
    store: Option<Arc<dyn KvStore>>,
    clock: Arc<dyn Clock>,
    config: VersionConfig,
}

impl VersionTracker {
    /// A tracker that only keeps history in memory.
    pub fn in_memory(clock: Arc<dyn Clock>, config: VersionConfig) -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            store: None,
            clock,
            config,
        }
    }

    /// A tracker that also persists each key's history to `store`.
    pub fn persistent(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: VersionConfig,
    ) -> Self {
        Self {
            store: Some(store),
            ..Self::in_memory(clock, config)
        }
    }

    /// Appends `data` as the next version of `key` and returns its number.
    pub fn track(&self, key: &str, data: Value) -> u64 {
        let mut histories = self.histories();
        let history = self.load(&mut histories, key);
        let version = history.last().map_or(1, |v| v.version + 1);
        history.push(VersionedData {
            data,
            version,
            timestamp: self.clock.now(),
        });
        let max = self.config.max_versions.max(1);
        if history.len() > max {
            let excess = history.len() - max;
            history.drain(..excess);
        }
        self.persist(key, history);
        version
    }

    /// Re-tracks the data of `version` as a new version. Returns the new
    /// version number, or `None` if `version` is not retained.
    pub fn rollback(&self, key: &str, version: u64) -> Option<u64> {
        let data = {
            let mut histories = self.histories();
            let history = self.load(&mut histories, key);
            history.iter().find(|v| v.version == version)?.data.clone()
        };
        debug!("Rolling {key} back to version {version}");
        Some(self.track(key, data))
    }

    pub fn latest(&self, key: &str) -> Option<VersionedData> {
        let mut histories = self.histories();
        self.load(&mut histories, key).last().cloned()
    }

    /// Retained versions, oldest first.
    pub fn history(&self, key: &str) -> Vec<VersionedData> {
        let mut histories = self.histories();
        self.load(&mut histories, key).clone()
    }

    /// Forgets the history of `key`.
    pub fn clear(&self, key: &str) {
        self.histories().remove(key);
        if let Some(store) = &self.store
            && let Err(e) = store.delete(&self.storage_key(key))
        {
            warn!("Failed to delete version history of {key}: {e}");
        }
    }

    fn load<'a>(
        &self,
        histories: &'a mut HashMap<String, Vec<VersionedData>>,
        key: &str,
    ) -> &'a mut Vec<VersionedData> {
        histories.entry(key.to_string()).or_insert_with(|| {
            let Some(store) = &self.store else {
                return Vec::new();
            };
            match read_json(store.as_ref(), &self.storage_key(key)) {
                Ok(saved) => saved.unwrap_or_default(),
                Err(e) => {
                    warn!("Failed to load version history of {key}: {e}");
                    Vec::new()
                }
            }
        })
    }

    fn persist(&self, key: &str, history: &[VersionedData]) {
        if let Some(store) = &self.store
            && let Err(e) = write_json(store.as_ref(), &self.storage_key(key), history)
        {
            warn!("Failed to persist version history of {key}: {e}");
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    fn histories(&self) -> MutexGuard<'_, HashMap<String, Vec<VersionedData>>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
