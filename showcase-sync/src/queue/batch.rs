//! Per-key batching of small items.
//!
//! A batch is handed to its handler as soon as it reaches `max_size`.
//! Otherwise every `add` re-arms a `max_delay_ms` timer; when the timer
//! fires the batch is flushed only if it holds at least `min_size` items.

use crate::config::BatchConfig;
use crate::error::SyncResult;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handles one batch.
pub type BatchFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

/// Per-key overrides; unset fields inherit the default config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOverrides {
    pub max_size: Option<usize>,
    pub max_delay_ms: Option<u64>,
    pub min_size: Option<usize>,
}

struct Pending {
    items: Vec<Value>,
    handler: BatchFn,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    defaults: BatchConfig,
    configs: Mutex<HashMap<String, BatchConfig>>,
    batches: Mutex<HashMap<String, Pending>>,
}

/// Batches items per key. Clones share state.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<Inner>,
}

impl BatchProcessor {
    pub fn new(defaults: BatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                defaults,
                configs: Mutex::new(HashMap::new()),
                batches: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Overrides the config of `key`.
    pub fn set_config(&self, key: &str, overrides: BatchOverrides) {
        let defaults = self.inner.defaults;
        let config = BatchConfig {
            max_size: overrides.max_size.unwrap_or(defaults.max_size),
            max_delay_ms: overrides.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            min_size: overrides.min_size.unwrap_or(defaults.min_size),
        };
        self.inner
            .configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), config);
    }

    /// The effective config of `key`.
    pub fn config_for(&self, key: &str) -> BatchConfig {
        self.inner
            .configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(self.inner.defaults)
    }

    /// Adds `item` to the batch of `key`.
    ///
    /// Returns the handler's error when this add filled the batch and the
    /// flush failed; the items are then back in the batch.
    pub async fn add(&self, key: &str, item: Value, handler: BatchFn) -> SyncResult<()> {
        let config = self.config_for(key);
        let full = {
            let mut batches = self.batches();
            let pending = batches.entry(key.to_string()).or_insert_with(|| Pending {
                items: Vec::new(),
                handler: Arc::clone(&handler),
                timer: None,
            });
            pending.handler = handler;
            pending.items.push(item);
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            if pending.items.len() >= config.max_size {
                Some((std::mem::take(&mut pending.items), Arc::clone(&pending.handler)))
            } else {
                pending.timer = Some(self.arm_timer(key, config));
                None
            }
        };

        match full {
            Some((items, handler)) => self.run(key, items, handler).await,
            None => Ok(()),
        }
    }

    /// Discards the pending batch of `key`. Returns how many items it held.
    pub fn flush(&self, key: &str) -> usize {
        match self.batches().remove(key) {
            Some(pending) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                pending.items.len()
            }
            None => 0,
        }
    }

    /// Number of items waiting in the batch of `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.batches().get(key).map_or(0, |p| p.items.len())
    }

    fn arm_timer(&self, key: &str, config: BatchConfig) -> JoinHandle<()> {
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(config.max_delay_ms)).await;
            this.flush_if_ready(&key, config.min_size).await;
        })
    }

    async fn flush_if_ready(&self, key: &str, min_size: usize) {
        let ready = {
            let mut batches = self.batches();
            let Some(pending) = batches.get_mut(key) else {
                return;
            };
            // Detach this timer so a concurrent add cannot abort the flush.
            pending.timer = None;
            if pending.items.len() < min_size {
                debug!("Batch {key} below minimum size ({} items), waiting", pending.items.len());
                None
            } else {
                Some((std::mem::take(&mut pending.items), Arc::clone(&pending.handler)))
            }
        };
        if let Some((items, handler)) = ready {
            // The error is already logged and the items requeued.
            let _ = self.run(key, items, handler).await;
        }
    }

    async fn run(&self, key: &str, items: Vec<Value>, handler: BatchFn) -> SyncResult<()> {
        let count = items.len();
        match handler(items.clone()).await {
            Ok(()) => {
                debug!("Processed batch {key} ({count} items)");
                Ok(())
            }
            Err(e) => {
                warn!("Batch {key} failed ({count} items), requeueing: {e}");
                let mut batches = self.batches();
                let pending = batches.entry(key.to_string()).or_insert_with(|| Pending {
                    items: Vec::new(),
                    handler: Arc::clone(&handler),
                    timer: None,
                });
                let arrived = std::mem::take(&mut pending.items);
                pending.items = items;
                pending.items.extend(arrived);
                Err(e)
            }
        }
    }

    fn batches(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.inner
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
