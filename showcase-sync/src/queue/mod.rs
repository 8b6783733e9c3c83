//! The mutation path: work deferred until it can reach the backend.
//!
//! - [`RequestQueue`]: durable, priority-scored, fail-stop
//! - [`BackgroundSync`]: durable tasks, priority-ordered, skip-and-continue
//! - [`OfflineLog`]: actions recorded offline, replayed oldest first
//! - [`BatchProcessor`]: per-key coalescing of many small items

mod background;
mod batch;
mod offline;
mod priority;
mod request;

pub use background::{BackgroundOutcome, BackgroundSync, SyncTask};
pub use batch::{BatchFn, BatchOverrides, BatchProcessor};
pub use offline::{OfflineAction, OfflineLog, ReplayOutcome};
pub use priority::{Priority, PriorityConfig, score};
pub use request::{
    DrainOutcome, NewRequest, Operation, QueuedRequest, RequestProcessor, RequestQueue,
};

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Executes background tasks and replayed offline actions.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs one unit of work of the given kind.
    async fn handle(&self, kind: &str, data: &Value) -> SyncResult<()>;
}

/// Holds a processing flag for as long as it lives.
pub(crate) struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    /// Sets the flag, or returns `None` if it was already set.
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
