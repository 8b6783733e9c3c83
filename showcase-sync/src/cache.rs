//! Persistent page cache with TTL expiry.
//!
//! Entries live in two tiers: an in-memory map for fast reads and the
//! per-tab session store, which survives navigation. Reads check memory
//! first and re-hydrate it from the session store on a miss. The cache is
//! best-effort: a failing session store is logged and otherwise treated as
//! a miss, never as an error.

use crate::config::CacheConfig;
use crate::error::SyncResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_storage::{KvStore, read_json, write_json};
use showcase_types::{Clock, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A cached value and the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Timestamp,
}

/// Two-tier TTL cache keyed by logical resource key.
pub struct PageCache {
    memory: Mutex<HashMap<String, CacheEntry<Value>>>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl PageCache {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
            clock,
            config,
        }
    }

    /// Stores `data` under `key`, replacing any previous entry.
    ///
    /// Only fails if `data` cannot be represented as JSON.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) -> SyncResult<()> {
        let value = serde_json::to_value(data)?;
        self.set_value(key, value);
        Ok(())
    }

    /// Stores an already-serialized value.
    pub fn set_value(&self, key: &str, data: Value) {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now(),
        };
        if let Err(e) = write_json(self.store.as_ref(), &self.storage_key(key), &entry) {
            warn!("Failed to persist cache entry {key}: {e}");
        }
        self.memory().insert(key.to_string(), entry);
    }

    /// Returns the value under `key` if it is still fresh.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Cache entry {key} has an unexpected shape: {e}");
                None
            }
        }
    }

    /// Returns the raw JSON value under `key` if it is still fresh.
    ///
    /// An expired entry is evicted from both tiers.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Returns the entry under `key`, with its write time, if still fresh.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let now = self.clock.now();

        let in_memory = self.memory().get(key).cloned();
        if let Some(entry) = in_memory {
            if self.is_fresh(&entry, now) {
                return Some(entry);
            }
            self.remove(key);
            return None;
        }

        let stored: Option<CacheEntry<Value>> =
            match read_json(self.store.as_ref(), &self.storage_key(key)) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read cache entry {key}: {e}");
                    None
                }
            };
        let entry = stored?;
        if !self.is_fresh(&entry, now) {
            self.remove(key);
            return None;
        }
        self.memory().insert(key.to_string(), entry.clone());
        Some(entry)
    }

    /// Removes `key` from both tiers.
    pub fn remove(&self, key: &str) {
        self.memory().remove(key);
        if let Err(e) = self.store.delete(&self.storage_key(key)) {
            warn!("Failed to delete cache entry {key}: {e}");
        }
    }

    /// Evicts every expired entry. Returns how many were removed.
    pub fn clear_stale(&self) -> usize {
        let now = self.clock.now();
        let mut stale: Vec<String> = self
            .memory()
            .iter()
            .filter(|(_, entry)| !self.is_fresh(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in self.stored_keys() {
            if stale.contains(&key) {
                continue;
            }
            match read_json::<CacheEntry<Value>>(self.store.as_ref(), &self.storage_key(&key)) {
                Ok(Some(entry)) if !self.is_fresh(&entry, now) => stale.push(key),
                Ok(_) => {}
                // Unreadable entries are dropped along with the stale ones.
                Err(_) => stale.push(key),
            }
        }

        for key in &stale {
            self.remove(key);
        }
        if !stale.is_empty() {
            debug!("Evicted {} stale cache entries", stale.len());
        }
        stale.len()
    }

    /// Wipes both tiers.
    pub fn clear(&self) {
        self.memory().clear();
        for key in self.stored_keys() {
            if let Err(e) = self.store.delete(&self.storage_key(&key)) {
                warn!("Failed to delete cache entry {key}: {e}");
            }
        }
    }

    /// Every logical key currently present in either tier, fresh or not.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.memory().keys().cloned().collect();
        for key in self.stored_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Sweeps expired entries every `sweep_interval_secs`.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.clear_stale();
            }
        })
    }

    fn is_fresh(&self, entry: &CacheEntry<Value>, now: Timestamp) -> bool {
        now.saturating_elapsed_since(entry.timestamp) <= self.config.ttl_ms
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    fn stored_keys(&self) -> Vec<String> {
        match self.store.keys_with_prefix(&self.config.key_prefix) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.config.key_prefix).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!("Failed to list cache entries: {e}");
                Vec::new()
            }
        }
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<Value>>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
