//! Durable request queue.
//!
//! Pending mutations are persisted as one JSON list. A drain re-sorts the
//! whole list by [`score`] each round, processes the head and stops at the
//! first failure, leaving everything behind it for the next drain.

use super::priority::{Priority, score};
use super::ProcessingGuard;
use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_storage::{KvStore, read_json, write_json};
use showcase_types::{Clock, RequestId, Timestamp};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// A mutation handed to [`RequestQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub operation: Operation,
    pub priority: Priority,
    /// `<table>` or `<table>/<id>`.
    pub endpoint: String,
    pub data: Value,
}

impl NewRequest {
    pub fn new(
        operation: Operation,
        priority: Priority,
        endpoint: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            operation,
            priority,
            endpoint: endpoint.into(),
            data,
        }
    }
}

/// A persisted pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub operation: Operation,
    pub priority: Priority,
    pub endpoint: String,
    pub data: Value,
    pub timestamp: Timestamp,
    pub retries: u32,
}

/// Sends a queued request to the backend.
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(&self, request: &QueuedRequest) -> SyncResult<()>;
}

/// What one drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Requests that succeeded and left the queue.
    pub processed: usize,
    /// The request whose failure stopped the drain.
    pub failed: Option<RequestId>,
    /// Set when that request ran out of retries and was dropped.
    pub dropped: Option<RequestId>,
    /// Requests still queued afterwards.
    pub remaining: usize,
    /// The drain did not run (offline, or another drain in progress).
    pub skipped: bool,
}

/// Priority-ordered durable queue of mutations awaiting the network.
pub struct RequestQueue {
    store: Arc<dyn KvStore>,
    processor: Arc<dyn RequestProcessor>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    queue: Mutex<Vec<QueuedRequest>>,
    processing: AtomicBool,
    online: AtomicBool,
}

impl RequestQueue {
    /// Creates a queue, reloading any requests persisted earlier.
    pub fn new(
        store: Arc<dyn KvStore>,
        processor: Arc<dyn RequestProcessor>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        let queue: Vec<QueuedRequest> = match read_json(store.as_ref(), &config.storage_key) {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load request queue: {e}");
                Vec::new()
            }
        };
        if !queue.is_empty() {
            info!("Restored {} queued requests", queue.len());
        }
        Self {
            store,
            processor,
            clock,
            config,
            queue: Mutex::new(queue),
            processing: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Appends a request, persists the queue and, when online, drains.
    pub async fn enqueue(&self, request: NewRequest) -> RequestId {
        let queued = QueuedRequest {
            id: RequestId::new(),
            operation: request.operation,
            priority: request.priority,
            endpoint: request.endpoint,
            data: request.data,
            timestamp: self.clock.now(),
            retries: 0,
        };
        let id = queued.id;
        debug!("Queued {:?} {} ({})", queued.operation, queued.endpoint, queued.priority);
        {
            let mut queue = self.queue();
            queue.push(queued);
            self.persist(&queue);
        }
        if self.is_online() {
            self.process().await;
        }
        id
    }

    /// Drains the queue in score order until it is empty or a request fails.
    pub async fn process(&self) -> DrainOutcome {
        if !self.is_online() {
            return DrainOutcome {
                remaining: self.len(),
                skipped: true,
                ..Default::default()
            };
        }
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            return DrainOutcome {
                remaining: self.len(),
                skipped: true,
                ..Default::default()
            };
        };

        let mut outcome = DrainOutcome::default();
        while let Some(head) = self.next_request() {
            let result = match tokio::time::timeout(
                head.priority.timeout(),
                self.processor.process(&head),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };

            let mut queue = self.queue();
            match result {
                Ok(()) => {
                    queue.retain(|r| r.id != head.id);
                    outcome.processed += 1;
                    self.persist(&queue);
                }
                Err(e) => {
                    outcome.failed = Some(head.id);
                    if let Some(pos) = queue.iter().position(|r| r.id == head.id) {
                        queue[pos].retries += 1;
                        let retries = queue[pos].retries;
                        if retries >= self.config.max_retries {
                            warn!(
                                "Dropping request {} to {} after {retries} failures: {e}",
                                head.id, head.endpoint
                            );
                            queue.remove(pos);
                            outcome.dropped = Some(head.id);
                        } else {
                            warn!(
                                "Request {} to {} failed ({retries}): {e}",
                                head.id, head.endpoint
                            );
                        }
                    }
                    self.persist(&queue);
                    break;
                }
            }
        }
        outcome.remaining = self.len();
        outcome
    }

    /// Pending requests in the order the next drain would take them.
    pub fn pending(&self) -> Vec<QueuedRequest> {
        let mut queue = self.queue().clone();
        self.sort_by_score(&mut queue);
        queue
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending request.
    pub fn clear(&self) {
        let mut queue = self.queue();
        queue.clear();
        self.persist(&queue);
    }

    fn next_request(&self) -> Option<QueuedRequest> {
        let mut queue = self.queue();
        self.sort_by_score(&mut queue);
        queue.first().cloned()
    }

    fn sort_by_score(&self, queue: &mut [QueuedRequest]) {
        let now = self.clock.now();
        queue.sort_by(|a, b| {
            let a_score = score(a.priority, now.saturating_elapsed_since(a.timestamp));
            let b_score = score(b.priority, now.saturating_elapsed_since(b.timestamp));
            b_score
                .partial_cmp(&a_score)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
    }

    fn persist(&self, queue: &[QueuedRequest]) {
        if let Err(e) = write_json(self.store.as_ref(), &self.config.storage_key, queue) {
            warn!("Failed to persist request queue: {e}");
        }
    }

    fn queue(&self) -> MutexGuard<'_, Vec<QueuedRequest>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
