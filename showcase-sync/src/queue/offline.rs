//! Actions recorded while offline, replayed once back online.

use super::{ProcessingGuard, TaskHandler};
use crate::config::OfflineConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_storage::{KvStore, read_json, write_json};
use showcase_types::{ActionId, Clock, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// One recorded action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: Timestamp,
    pub synced: bool,
}

/// What one replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub synced: Vec<ActionId>,
    pub failed: Vec<ActionId>,
    /// Synced actions purged for being past retention.
    pub purged: usize,
    pub skipped: bool,
}

/// Durable log of offline actions.
pub struct OfflineLog {
    store: Arc<dyn KvStore>,
    handler: Arc<dyn TaskHandler>,
    clock: Arc<dyn Clock>,
    config: OfflineConfig,
    actions: Mutex<Vec<OfflineAction>>,
    replaying: AtomicBool,
    online: AtomicBool,
}

impl OfflineLog {
    pub fn new(
        store: Arc<dyn KvStore>,
        handler: Arc<dyn TaskHandler>,
        clock: Arc<dyn Clock>,
        config: OfflineConfig,
    ) -> Self {
        let actions = match read_json(store.as_ref(), &config.storage_key) {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load offline actions: {e}");
                Vec::new()
            }
        };
        Self {
            store,
            handler,
            clock,
            config,
            actions: Mutex::new(actions),
            replaying: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records an action and replays right away when online.
    pub async fn record_action(&self, kind: &str, data: Value) -> ActionId {
        let action = OfflineAction {
            id: ActionId::new(),
            kind: kind.to_string(),
            data,
            timestamp: self.clock.now(),
            synced: false,
        };
        let id = action.id;
        {
            let mut actions = self.actions();
            actions.push(action);
            self.persist(&actions);
        }
        if self.is_online() {
            self.replay().await;
        }
        id
    }

    /// Replays unsynced actions oldest first, then purges old synced ones.
    pub async fn replay(&self) -> ReplayOutcome {
        if !self.is_online() {
            return ReplayOutcome {
                skipped: true,
                ..Default::default()
            };
        }
        let Some(_guard) = ProcessingGuard::acquire(&self.replaying) else {
            return ReplayOutcome {
                skipped: true,
                ..Default::default()
            };
        };

        let mut outcome = ReplayOutcome::default();
        for action in self.unsynced() {
            match self.handler.handle(&action.kind, &action.data).await {
                Ok(()) => {
                    let mut actions = self.actions();
                    if let Some(stored) = actions.iter_mut().find(|a| a.id == action.id) {
                        stored.synced = true;
                    }
                    self.persist(&actions);
                    outcome.synced.push(action.id);
                }
                Err(e) => {
                    warn!("Offline action {} ({}) failed to replay: {e}", action.id, action.kind);
                    outcome.failed.push(action.id);
                }
            }
        }
        outcome.purged = self.purge_synced();
        if !outcome.synced.is_empty() {
            info!("Replayed {} offline actions", outcome.synced.len());
        }
        outcome
    }

    /// Actions not yet synced, oldest first.
    pub fn unsynced(&self) -> Vec<OfflineAction> {
        let mut pending: Vec<OfflineAction> =
            self.actions().iter().filter(|a| !a.synced).cloned().collect();
        pending.sort_by_key(|a| a.timestamp);
        pending
    }

    /// Every retained action.
    pub fn actions_snapshot(&self) -> Vec<OfflineAction> {
        self.actions().clone()
    }

    fn purge_synced(&self) -> usize {
        let now = self.clock.now();
        let mut actions = self.actions();
        let before = actions.len();
        actions.retain(|a| {
            !(a.synced && now.saturating_elapsed_since(a.timestamp) > self.config.retention_ms)
        });
        let purged = before - actions.len();
        if purged > 0 {
            debug!("Purged {purged} synced offline actions");
            self.persist(&actions);
        }
        purged
    }

    fn persist(&self, actions: &[OfflineAction]) {
        if let Err(e) = write_json(self.store.as_ref(), &self.config.storage_key, actions) {
            warn!("Failed to persist offline actions: {e}");
        }
    }

    fn actions(&self) -> MutexGuard<'_, Vec<OfflineAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
