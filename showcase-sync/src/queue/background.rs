//! Background sync tasks.
//!
//! Unlike the request queue a failing task does not block the others:
//! processing records the attempt and moves on to the next task.

use super::{ProcessingGuard, TaskHandler};
use crate::config::BackgroundConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_storage::{KvStore, read_json, write_json};
use showcase_types::{Clock, TaskId, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A pending background mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    /// Higher runs first.
    pub priority: i32,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<Timestamp>,
    pub attempts: u32,
}

/// What one processing pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundOutcome {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Tasks deleted for having used up their retries.
    pub dropped: Vec<TaskId>,
    pub skipped: bool,
}

/// Durable set of background tasks.
pub struct BackgroundSync {
    store: Arc<dyn KvStore>,
    handler: Arc<dyn TaskHandler>,
    clock: Arc<dyn Clock>,
    config: BackgroundConfig,
    tasks: Mutex<HashMap<TaskId, SyncTask>>,
    processing: AtomicBool,
    online: AtomicBool,
}

impl BackgroundSync {
    /// Creates the manager, reloading tasks persisted earlier.
    pub fn new(
        store: Arc<dyn KvStore>,
        handler: Arc<dyn TaskHandler>,
        clock: Arc<dyn Clock>,
        config: BackgroundConfig,
    ) -> Self {
        let saved: Vec<SyncTask> = match read_json(store.as_ref(), &config.storage_key) {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load background tasks: {e}");
                Vec::new()
            }
        };
        let tasks = saved.into_iter().map(|task| (task.id, task)).collect();
        Self {
            store,
            handler,
            clock,
            config,
            tasks: Mutex::new(tasks),
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

    /// Stores a new task and processes immediately when online.
    pub async fn register_task(&self, kind: &str, data: Value, priority: i32) -> TaskId {
        let task = SyncTask {
            id: TaskId::new(),
            kind: kind.to_string(),
            data,
            priority,
            timestamp: self.clock.now(),
            last_attempt: None,
            attempts: 0,
        };
        let id = task.id;
        {
            let mut tasks = self.tasks();
            tasks.insert(id, task);
            self.persist(&tasks);
        }
        if self.is_online() {
            self.process().await;
        }
        id
    }

    /// Runs every task once, highest priority first, oldest first within a
    /// priority.
    pub async fn process(&self) -> BackgroundOutcome {
        if !self.is_online() {
            return BackgroundOutcome {
                skipped: true,
                ..Default::default()
            };
        }
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            return BackgroundOutcome {
                skipped: true,
                ..Default::default()
            };
        };

        let mut outcome = BackgroundOutcome::default();
        for task in self.pending() {
            if task.attempts >= self.config.max_retries {
                warn!(
                    "Dropping background task {} ({}) after {} attempts",
                    task.id, task.kind, task.attempts
                );
                self.remove(task.id);
                outcome.dropped.push(task.id);
                continue;
            }

            match self.handler.handle(&task.kind, &task.data).await {
                Ok(()) => {
                    debug!("Background task {} ({}) completed", task.id, task.kind);
                    self.remove(task.id);
                    outcome.completed.push(task.id);
                }
                Err(e) => {
                    warn!("Background task {} ({}) failed: {e}", task.id, task.kind);
                    let now = self.clock.now();
                    let mut tasks = self.tasks();
                    if let Some(stored) = tasks.get_mut(&task.id) {
                        stored.attempts += 1;
                        stored.last_attempt = Some(now);
                    }
                    self.persist(&tasks);
                    outcome.failed.push(task.id);
                }
            }
        }
        outcome
    }

    /// Tasks in processing order.
    pub fn pending(&self) -> Vec<SyncTask> {
        let mut tasks: Vec<SyncTask> = self.tasks().values().cloned().collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    pub fn get(&self, id: TaskId) -> Option<SyncTask> {
        self.tasks().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Processes every `interval_secs` while online.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if self.is_online() {
                    self.process().await;
                }
            }
        })
    }

    fn remove(&self, id: TaskId) {
        let mut tasks = self.tasks();
        tasks.remove(&id);
        self.persist(&tasks);
    }

    fn persist(&self, tasks: &HashMap<TaskId, SyncTask>) {
        let mut list: Vec<&SyncTask> = tasks.values().collect();
        list.sort_by_key(|task| task.timestamp);
        if let Err(e) = write_json(self.store.as_ref(), &self.config.storage_key, &list) {
            warn!("Failed to persist background tasks: {e}");
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, SyncTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
