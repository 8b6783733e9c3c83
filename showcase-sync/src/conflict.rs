//! Conflict resolution between a local and a remote copy of a record.
//!
//! Strategies are pure functions looked up by name:
//!
//! - `timestamp`: the copy with the strictly newer `updatedAt` wins, so
//!   remote wins ties and wins whenever either timestamp is missing
//! - `array-merge`: set union of two arrays
//! - `object-merge`: remote fields overlaid by local fields, `updatedAt`
//!   set to the later of the two
//!
//! Asking for an unregistered strategy is an error.

use crate::error::{SyncError, SyncResult};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub const TIMESTAMP: &str = "timestamp";
pub const ARRAY_MERGE: &str = "array-merge";
pub const OBJECT_MERGE: &str = "object-merge";

/// Produces the resolved value from `(local, remote)`.
pub type ResolveFn = Arc<dyn Fn(&Value, &Value) -> SyncResult<Value> + Send + Sync>;

/// Outcome of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub local: Value,
    pub remote: Value,
    pub resolved: Value,
    pub strategy: String,
}

/// Reads a timestamp as epoch milliseconds.
///
/// Accepts a number of milliseconds or an RFC 3339 string.
pub fn parse_time(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// The `updatedAt` (or `updated_at`) of a record in epoch milliseconds.
pub fn updated_at(record: &Value) -> Option<i64> {
    record
        .get("updatedAt")
        .or_else(|| record.get("updated_at"))
        .and_then(parse_time)
}

fn resolve_by_timestamp(local: &Value, remote: &Value) -> SyncResult<Value> {
    let local_wins = match (updated_at(local), updated_at(remote)) {
        (Some(l), Some(r)) => l > r,
        _ => false,
    };
    Ok(if local_wins {
        local.clone()
    } else {
        remote.clone()
    })
}

fn merge_arrays(local: &Value, remote: &Value) -> SyncResult<Value> {
    let (Some(local), Some(remote)) = (local.as_array(), remote.as_array()) else {
        return Err(SyncError::Conflict(
            "array-merge needs two arrays".to_string(),
        ));
    };
    let mut merged: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    for item in local.iter().chain(remote) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    Ok(Value::Array(merged))
}

fn merge_objects(local: &Value, remote: &Value) -> SyncResult<Value> {
    let (Some(local_fields), Some(remote_fields)) = (local.as_object(), remote.as_object()) else {
        return Err(SyncError::Conflict(
            "object-merge needs two objects".to_string(),
        ));
    };
    let mut merged = remote_fields.clone();
    for (field, value) in local_fields {
        merged.insert(field.clone(), value.clone());
    }

    let latest = match (updated_at(local), updated_at(remote)) {
        (Some(l), Some(r)) if r > l => remote.get("updatedAt").or_else(|| remote.get("updated_at")),
        (None, Some(_)) => remote.get("updatedAt").or_else(|| remote.get("updated_at")),
        _ => local.get("updatedAt").or_else(|| local.get("updated_at")),
    };
    if let Some(latest) = latest.cloned() {
        merged.insert("updatedAt".to_string(), latest);
    }
    Ok(Value::Object(merged))
}

/// Registry of named resolution strategies.
pub struct ConflictResolver {
    strategies: RwLock<HashMap<String, ResolveFn>>,
}

impl ConflictResolver {
    /// Creates a resolver with the three built-in strategies.
    pub fn new() -> Self {
        let mut strategies: HashMap<String, ResolveFn> = HashMap::new();
        strategies.insert(TIMESTAMP.to_string(), Arc::new(resolve_by_timestamp));
        strategies.insert(ARRAY_MERGE.to_string(), Arc::new(merge_arrays));
        strategies.insert(OBJECT_MERGE.to_string(), Arc::new(merge_objects));
        Self {
            strategies: RwLock::new(strategies),
        }
    }

    /// Adds or replaces a strategy.
    pub fn register_strategy(
        &self,
        name: &str,
        resolve: impl Fn(&Value, &Value) -> SyncResult<Value> + Send + Sync + 'static,
    ) {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(resolve));
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Resolves `local` against `remote` with the named strategy.
    pub fn resolve_conflict(
        &self,
        entity_type: &str,
        local: &Value,
        remote: &Value,
        strategy: &str,
    ) -> SyncResult<ConflictResolution> {
        let resolve = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(strategy)
            .cloned()
            .ok_or_else(|| SyncError::UnknownStrategy(strategy.to_string()))?;
        let resolved = resolve(local, remote)?;
        debug!("Resolved {entity_type} conflict with {strategy}");
        Ok(ConflictResolution {
            local: local.clone(),
            remote: remote.clone(),
            resolved,
            strategy: strategy.to_string(),
        })
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}
