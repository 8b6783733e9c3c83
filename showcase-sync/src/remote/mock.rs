//! In-memory backend for tests and local development.

use super::source::{ChangeEvent, ChangeKind, Filter, Record, RemoteSource};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use showcase_types::EntityKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Kind of failure injected by [`MockRemote::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Auth,
    Status(u16),
}

impl Failure {
    fn to_error(self) -> SyncError {
        match self {
            Failure::Network => SyncError::Network("mock connection refused".to_string()),
            Failure::Auth => SyncError::Auth("mock session expired".to_string()),
            Failure::Status(status) => SyncError::Remote {
                status,
                message: "mock failure".to_string(),
            },
        }
    }
}

/// Tables held in memory, with a change feed.
pub struct MockRemote {
    tables: Mutex<HashMap<EntityKind, Vec<Record>>>,
    changes: broadcast::Sender<ChangeEvent>,
    failures: Mutex<Vec<Failure>>,
    next_id: AtomicU64,
    calls: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            tables: Mutex::new(HashMap::new()),
            changes,
            failures: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Inserts rows directly, without emitting change events.
    pub fn seed(&self, kind: EntityKind, rows: Vec<Record>) {
        self.tables().entry(kind).or_default().extend(rows);
    }

    /// Makes the next `times` calls fail with `failure`.
    pub fn fail_next(&self, times: usize, failure: Failure) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.extend(std::iter::repeat_n(failure, times));
    }

    /// Number of calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<Record> {
        self.tables().get(&kind).cloned().unwrap_or_default()
    }

    /// Emits a change event as if another client had written.
    pub fn emit(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }

    fn begin(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0).to_error())
        }
    }

    fn notify(&self, entity: EntityKind, change: ChangeKind, id: &str) {
        self.emit(ChangeEvent {
            entity,
            change,
            id: Some(id.to_string()),
        });
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<EntityKind, Vec<Record>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_payload(record: &mut Record, payload: &Value) {
    if let Some(fields) = payload.as_object() {
        for (name, value) in fields {
            if !matches!(name.as_str(), "id" | "created_at" | "updated_at") {
                record.fields.insert(name.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch_all(
        &self,
        kind: EntityKind,
        filter: Option<&Filter>,
    ) -> SyncResult<Vec<Record>> {
        self.begin()?;
        let mut rows: Vec<Record> = self
            .rows(kind)
            .into_iter()
            .filter(|r| filter.is_none_or(|f| f.matches(r)))
            .collect();
        if let Some(order) = filter.and_then(|f| f.order.as_ref()) {
            rows.sort_by(|a, b| {
                let key = |r: &Record| r.to_value().get(&order.column).map(Value::to_string);
                let ordering = key(a).cmp(&key(b));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn fetch_one(&self, kind: EntityKind, id: &str) -> SyncResult<Option<Record>> {
        self.begin()?;
        Ok(self.rows(kind).into_iter().find(|r| r.id == id))
    }

    async fn create(&self, kind: EntityKind, payload: &Value) -> SyncResult<Record> {
        self.begin()?;
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        let now = Utc::now();
        let mut record = Record::new(id.clone());
        record.created_at = Some(now);
        record.updated_at = Some(now);
        apply_payload(&mut record, payload);
        self.tables().entry(kind).or_default().push(record.clone());
        self.notify(kind, ChangeKind::Insert, &id);
        Ok(record)
    }

    async fn update(&self, kind: EntityKind, id: &str, payload: &Value) -> SyncResult<Record> {
        self.begin()?;
        let updated = {
            let mut tables = self.tables();
            let record = tables
                .get_mut(&kind)
                .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
                .ok_or_else(|| SyncError::Remote {
                    status: 404,
                    message: format!("{kind} row {id} not found"),
                })?;
            apply_payload(record, payload);
            record.updated_at = Some(Utc::now());
            record.clone()
        };
        self.notify(kind, ChangeKind::Update, id);
        Ok(updated)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<Record> {
        self.begin()?;
        let removed = {
            let mut tables = self.tables();
            let rows = tables.entry(kind).or_default();
            let pos = rows.iter().position(|r| r.id == id).ok_or_else(|| SyncError::Remote {
                status: 404,
                message: format!("{kind} row {id} not found"),
            })?;
            rows.remove(pos)
        };
        self.notify(kind, ChangeKind::Delete, id);
        Ok(removed)
    }

    async fn subscribe_to_changes(
        &self,
        kind: EntityKind,
        filter: Option<Filter>,
    ) -> SyncResult<BoxStream<'static, ChangeEvent>> {
        self.begin()?;
        // Events carry no row, so only the table is filtered on.
        let _ = filter;
        let receiver = self.changes.subscribe();
        let events = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.entity == kind => return Some((event, receiver)),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}
