//! Optimistic updates awaiting server confirmation.
//!
//! An update is shown to the user before the backend confirms it. It
//! settles exactly once, as succeeded or failed, and stays visible for a
//! short grace period afterwards so the UI can show the outcome.

use crate::config::OptimisticConfig;
use crate::error::{SyncError, SyncResult};
use crate::listeners::{KeyedListeners, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_types::{Clock, Timestamp, UpdateId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Lifecycle of an optimistic update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum UpdateState {
    Pending,
    Succeeded,
    Failed(String),
}

impl UpdateState {
    /// Moves to `next`. Only a pending update may settle, and only into a
    /// terminal state.
    pub fn transition(&self, next: UpdateState) -> SyncResult<UpdateState> {
        match (self, &next) {
            (UpdateState::Pending, UpdateState::Succeeded | UpdateState::Failed(_)) => Ok(next),
            (from, to) => Err(SyncError::InvalidTransition(format!(
                "optimistic update cannot move from {from:?} to {to:?}"
            ))),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, UpdateState::Pending)
    }
}

/// One speculative mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticUpdate {
    pub id: UpdateId,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub rollback_data: Value,
    pub timestamp: Timestamp,
    pub state: UpdateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<Timestamp>,
}

/// Tracks optimistic updates by id.
pub struct OptimisticUpdates {
    updates: Mutex<HashMap<UpdateId, OptimisticUpdate>>,
    listeners: KeyedListeners<OptimisticUpdate>,
    clock: Arc<dyn Clock>,
    config: OptimisticConfig,
}

impl OptimisticUpdates {
    pub fn new(clock: Arc<dyn Clock>, config: OptimisticConfig) -> Self {
        Self {
            updates: Mutex::new(HashMap::new()),
            listeners: KeyedListeners::new(),
            clock,
            config,
        }
    }

    /// Records a pending update of `kind`.
    pub fn track(&self, kind: &str, data: Value, rollback_data: Value) -> UpdateId {
        self.purge_settled();
        let update = OptimisticUpdate {
            id: UpdateId::new(),
            kind: kind.to_string(),
            data,
            rollback_data,
            timestamp: self.clock.now(),
            state: UpdateState::Pending,
            settled_at: None,
        };
        let id = update.id;
        self.updates().insert(id, update.clone());
        self.listeners.notify(kind, &update);
        id
    }

    /// Marks the update confirmed.
    pub fn succeed(&self, id: UpdateId) -> SyncResult<OptimisticUpdate> {
        self.settle(id, UpdateState::Succeeded)
    }

    /// Marks the update failed. The returned update carries the data to
    /// roll back to.
    pub fn fail(&self, id: UpdateId, reason: impl Into<String>) -> SyncResult<OptimisticUpdate> {
        self.settle(id, UpdateState::Failed(reason.into()))
    }

    pub fn get(&self, id: UpdateId) -> Option<OptimisticUpdate> {
        self.purge_settled();
        self.updates().get(&id).cloned()
    }

    /// Pending updates of `kind`, oldest first.
    pub fn pending(&self, kind: &str) -> Vec<OptimisticUpdate> {
        self.purge_settled();
        let mut pending: Vec<OptimisticUpdate> = self
            .updates()
            .values()
            .filter(|u| u.kind == kind && !u.state.is_settled())
            .cloned()
            .collect();
        pending.sort_by_key(|u| (u.timestamp, u.id));
        pending
    }

    /// Observes every change to updates of `kind`.
    pub fn subscribe(
        &self,
        kind: &str,
        callback: impl Fn(&OptimisticUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(kind, callback)
    }

    /// Drops settled updates whose grace period has elapsed.
    pub fn purge_settled(&self) -> usize {
        let now = self.clock.now();
        let grace = self.config.grace_period_ms;
        let mut updates = self.updates();
        let before = updates.len();
        updates.retain(|_, u| {
            u.settled_at
                .is_none_or(|at| now.saturating_elapsed_since(at) < grace)
        });
        before - updates.len()
    }

    fn settle(&self, id: UpdateId, next: UpdateState) -> SyncResult<OptimisticUpdate> {
        let settled = {
            let mut updates = self.updates();
            let update = updates.get_mut(&id).ok_or_else(|| {
                SyncError::InvalidTransition(format!("unknown optimistic update {id}"))
            })?;
            update.state = update.state.transition(next)?;
            update.settled_at = Some(self.clock.now());
            update.clone()
        };
        debug!("Optimistic update {id} settled as {:?}", settled.state);
        self.listeners.notify(&settled.kind, &settled);
        Ok(settled)
    }

    fn updates(&self) -> MutexGuard<'_, HashMap<UpdateId, OptimisticUpdate>> {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
