//! PostgREST backend over HTTP.
//!
//! Tables live under `<base_url>/rest/v1/<table>`. Every request carries
//! the project API key as `apikey` and a bearer token (the signed-in
//! user's access token, or the API key when signed out). Mutations ask for
//! `Prefer: return=representation` so the affected rows come back.

use super::source::{ChangeEvent, ChangeKind, Filter, Record, RemoteSource};
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use showcase_types::EntityKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Deserialize)]
struct RowMarker {
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Table snapshot the change feed compares between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableMarker {
    rows: usize,
    newest: Option<DateTime<Utc>>,
}

/// REST client for the backend.
#[derive(Clone)]
pub struct RestRemote {
    client: Client,
    config: RemoteConfig,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestRemote {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Sets (or clears) the signed-in user's access token.
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            kind.table()
        )
    }

    async fn request(&self, method: Method, kind: EntityKind) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.config.api_key.clone());
        self.client
            .request(method, self.table_url(kind))
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    fn filter_query(filter: Option<&Filter>) -> Vec<(String, String)> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        if let Some(filter) = filter {
            for (column, value) in &filter.eq {
                query.push((column.clone(), format!("eq.{value}")));
            }
            if let Some(order) = &filter.order {
                let direction = if order.ascending { "asc" } else { "desc" };
                query.push(("order".to_string(), format!("{}.{direction}", order.column)));
            }
        }
        query
    }

    async fn send(builder: RequestBuilder, what: &str) -> SyncResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{what} failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Auth(format!("{what} rejected: {message}")));
        }
        Err(SyncError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn rows(response: Response, what: &str) -> SyncResult<Vec<Record>> {
        response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("failed to parse {what} response: {e}")))
    }

    fn single(rows: Vec<Record>, kind: EntityKind, id: Option<&str>) -> SyncResult<Record> {
        rows.into_iter().next().ok_or_else(|| SyncError::Remote {
            status: 404,
            message: match id {
                Some(id) => format!("{kind} row {id} not found"),
                None => format!("{kind} returned no row"),
            },
        })
    }

    async fn marker(&self, kind: EntityKind, filter: Option<&Filter>) -> SyncResult<TableMarker> {
        let mut query = vec![("select".to_string(), "id,updated_at".to_string())];
        if let Some(filter) = filter {
            for (column, value) in &filter.eq {
                query.push((column.clone(), format!("eq.{value}")));
            }
        }
        let builder = self.request(Method::GET, kind).await.query(&query);
        let response = Self::send(builder, "change poll").await?;
        let rows: Vec<RowMarker> = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("failed to parse change poll: {e}")))?;
        Ok(TableMarker {
            rows: rows.len(),
            newest: rows.iter().filter_map(|r| r.updated_at).max(),
        })
    }
}

#[async_trait]
impl RemoteSource for RestRemote {
    async fn fetch_all(
        &self,
        kind: EntityKind,
        filter: Option<&Filter>,
    ) -> SyncResult<Vec<Record>> {
        let builder = self
            .request(Method::GET, kind)
            .await
            .query(&Self::filter_query(filter));
        let response = Self::send(builder, "fetch").await?;
        let rows = Self::rows(response, "fetch").await?;
        debug!("Fetched {} {kind} rows", rows.len());
        Ok(rows)
    }

    async fn fetch_one(&self, kind: EntityKind, id: &str) -> SyncResult<Option<Record>> {
        let filter = Filter::new().eq("id", id);
        let builder = self
            .request(Method::GET, kind)
            .await
            .query(&Self::filter_query(Some(&filter)));
        let response = Self::send(builder, "fetch").await?;
        Ok(Self::rows(response, "fetch").await?.into_iter().next())
    }

    async fn create(&self, kind: EntityKind, payload: &Value) -> SyncResult<Record> {
        let builder = self
            .request(Method::POST, kind)
            .await
            .header("Prefer", RETURN_REPRESENTATION)
            .json(payload);
        let response = Self::send(builder, "create").await?;
        Self::single(Self::rows(response, "create").await?, kind, None)
    }

    async fn update(&self, kind: EntityKind, id: &str, payload: &Value) -> SyncResult<Record> {
        let builder = self
            .request(Method::PATCH, kind)
            .await
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", RETURN_REPRESENTATION)
            .json(payload);
        let response = Self::send(builder, "update").await?;
        Self::single(Self::rows(response, "update").await?, kind, Some(id))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<Record> {
        let builder = self
            .request(Method::DELETE, kind)
            .await
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", RETURN_REPRESENTATION);
        let response = Self::send(builder, "delete").await?;
        Self::single(Self::rows(response, "delete").await?, kind, Some(id))
    }

    async fn subscribe_to_changes(
        &self,
        kind: EntityKind,
        filter: Option<Filter>,
    ) -> SyncResult<BoxStream<'static, ChangeEvent>> {
        // The first poll sets the baseline and must succeed.
        let baseline = self.marker(kind, filter.as_ref()).await?;
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let remote = self.clone();

        let events = stream::unfold(baseline, move |mut last| {
            let remote = remote.clone();
            let filter = filter.clone();
            async move {
                loop {
                    tokio::time::sleep(period).await;
                    let current = match remote.marker(kind, filter.as_ref()).await {
                        Ok(marker) => marker,
                        Err(e) => {
                            warn!("Polling {kind} for changes failed: {e}");
                            continue;
                        }
                    };
                    if current == last {
                        continue;
                    }
                    let change = if current.rows > last.rows {
                        ChangeKind::Insert
                    } else if current.rows < last.rows {
                        ChangeKind::Delete
                    } else {
                        ChangeKind::Update
                    };
                    last = current;
                    let event = ChangeEvent {
                        entity: kind,
                        change,
                        id: None,
                    };
                    return Some((event, last));
                }
            }
        });
        Ok(events.boxed())
    }
}
