//! The remote source abstraction.

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use showcase_types::EntityKind;

/// A backend row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Every other column.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// The record as one JSON object.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Sort order of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Row filter: column equalities plus an optional order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub eq: Vec<(String, String)>,
    pub order: Option<Order>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq.push((column.into(), value.into()));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    /// Whether `record` passes the equality filters.
    pub fn matches(&self, record: &Record) -> bool {
        self.eq.iter().all(|(column, expected)| {
            let actual = if column == "id" {
                Some(Value::String(record.id.clone()))
            } else {
                record.fields.get(column).cloned()
            };
            match actual {
                Some(Value::String(s)) => &s == expected,
                Some(Value::Null) | None => false,
                Some(other) => &other.to_string() == expected,
            }
        })
    }
}

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub change: ChangeKind,
    /// Affected row, when the feed knows it.
    pub id: Option<String>,
}

/// The backend: typed CRUD plus a change feed per table.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_all(&self, kind: EntityKind, filter: Option<&Filter>)
    -> SyncResult<Vec<Record>>;

    async fn fetch_one(&self, kind: EntityKind, id: &str) -> SyncResult<Option<Record>>;

    async fn create(&self, kind: EntityKind, payload: &Value) -> SyncResult<Record>;

    async fn update(&self, kind: EntityKind, id: &str, payload: &Value) -> SyncResult<Record>;

    /// Deletes a row and returns it as it was.
    async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<Record>;

    /// Streams change events for `kind`.
    async fn subscribe_to_changes(
        &self,
        kind: EntityKind,
        filter: Option<Filter>,
    ) -> SyncResult<BoxStream<'static, ChangeEvent>>;
}
