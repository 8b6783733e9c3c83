//! Per-key sync status as seen by UI consumers.

use crate::listeners::{KeyedListeners, Subscription};
use serde::{Deserialize, Serialize};
use showcase_types::{Clock, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Time of the last successful sync.
    pub last_sync: Option<Timestamp>,
    pub in_progress: bool,
    /// Error of the last failed sync, cleared by the next start.
    pub error: Option<String>,
}

pub struct SyncStatusTracker {
    statuses: Mutex<HashMap<String, SyncStatus>>,
    listeners: KeyedListeners<SyncStatus>,
    clock: Arc<dyn Clock>,
}

impl SyncStatusTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            listeners: KeyedListeners::new(),
            clock,
        }
    }

    pub fn start(&self, key: &str) {
        self.update(key, |status| {
            status.in_progress = true;
            status.error = None;
        });
    }

    pub fn complete(&self, key: &str) {
        let now = self.clock.now();
        self.update(key, |status| {
            status.in_progress = false;
            status.last_sync = Some(now);
            status.error = None;
        });
    }

    pub fn fail(&self, key: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(key, |status| {
            status.in_progress = false;
            status.error = Some(error);
        });
    }

    /// Current status; a key never synced has the default status.
    pub fn get(&self, key: &str) -> SyncStatus {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Observes `key`. The current status is replayed immediately.
    pub fn subscribe(
        &self,
        key: &str,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        callback(&self.get(key));
        self.listeners.subscribe(key, callback)
    }

    pub fn clear(&self, key: &str) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn update(&self, key: &str, change: impl FnOnce(&mut SyncStatus)) {
        let status = {
            let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
            let status = statuses.entry(key.to_string()).or_default();
            change(status);
            status.clone()
        };
        self.listeners.notify(key, &status);
    }
}
