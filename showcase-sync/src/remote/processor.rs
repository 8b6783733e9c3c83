//! Executes queued mutations against a [`RemoteSource`].

use super::source::RemoteSource;
use crate::error::{SyncError, SyncResult};
use crate::queue::{Operation, QueuedRequest, RequestProcessor, TaskHandler};
use async_trait::async_trait;
use serde_json::Value;
use showcase_types::EntityKind;
use std::sync::Arc;
use tracing::debug;

/// Splits `<table>` or `<table>/<id>` into its parts.
pub fn parse_endpoint(endpoint: &str) -> SyncResult<(EntityKind, Option<String>)> {
    let endpoint = endpoint.trim_matches('/');
    let (table, id) = match endpoint.split_once('/') {
        Some((table, id)) if !id.is_empty() && !id.contains('/') => (table, Some(id.to_string())),
        Some(_) => {
            return Err(SyncError::Validation(vec![format!(
                "invalid endpoint: {endpoint}"
            )]));
        }
        None => (endpoint, None),
    };
    let kind = table
        .parse::<EntityKind>()
        .map_err(|e| SyncError::Validation(vec![e.to_string()]))?;
    Ok((kind, id))
}

/// Sends queued requests and background tasks to the backend.
///
/// Background task kinds take the form `<operation>:<endpoint>`, e.g.
/// `update:profiles/42`.
pub struct RemoteRequestProcessor {
    remote: Arc<dyn RemoteSource>,
}

impl RemoteRequestProcessor {
    pub fn new(remote: Arc<dyn RemoteSource>) -> Self {
        Self { remote }
    }

    /// Runs one mutation.
    pub async fn execute(
        &self,
        operation: Operation,
        endpoint: &str,
        data: &Value,
    ) -> SyncResult<()> {
        let (kind, id) = parse_endpoint(endpoint)?;
        match (operation, id) {
            (Operation::Create, _) => {
                self.remote.create(kind, data).await?;
            }
            (Operation::Update, Some(id)) => {
                self.remote.update(kind, &id, data).await?;
            }
            (Operation::Delete, Some(id)) => {
                self.remote.delete(kind, &id).await?;
            }
            (operation, None) => {
                return Err(SyncError::Validation(vec![format!(
                    "{operation:?} on {endpoint} needs a row id"
                )]));
            }
        }
        debug!("Executed {operation:?} {endpoint}");
        Ok(())
    }
}

#[async_trait]
impl RequestProcessor for RemoteRequestProcessor {
    async fn process(&self, request: &QueuedRequest) -> SyncResult<()> {
        self.execute(request.operation, &request.endpoint, &request.data)
            .await
    }
}

#[async_trait]
impl TaskHandler for RemoteRequestProcessor {
    async fn handle(&self, kind: &str, data: &Value) -> SyncResult<()> {
        let (operation, endpoint) = kind.split_once(':').ok_or_else(|| {
            SyncError::Validation(vec![format!("invalid task kind: {kind}")])
        })?;
        let operation = match operation {
            "create" => Operation::Create,
            "update" => Operation::Update,
            "delete" => Operation::Delete,
            other => {
                return Err(SyncError::Validation(vec![format!(
                    "unknown operation: {other}"
                )]));
            }
        };
        self.execute(operation, endpoint, data).await
    }
}
