//! Checksum-based integrity checks.
//!
//! Each check runs the entity's structural rules, warns about missing
//! metadata and compares a SHA-256 digest of the canonical JSON form with
//! the digest recorded by the previous check of the same entity type. A
//! changed digest is only a warning: the data is still usable.

use crate::listeners::{KeyedListeners, Subscription};
use crate::validation::{Rule, ValidationResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use showcase_types::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::warn;

/// Same shape as a validation result; `entity_type` is always set.
pub type IntegrityCheckResult = ValidationResult;

/// Hex SHA-256 of the compact JSON serialization of `data`.
pub fn checksum(data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Tracks the last checksum per entity type.
pub struct IntegrityChecker {
    rules: RwLock<HashMap<String, Rule>>,
    checksums: Mutex<HashMap<String, String>>,
    results: Mutex<HashMap<String, IntegrityCheckResult>>,
    listeners: KeyedListeners<IntegrityCheckResult>,
    clock: Arc<dyn Clock>,
}

impl IntegrityChecker {
    /// Creates a checker with the built-in `profile` and `project` rules.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let mut rules: HashMap<String, Rule> = HashMap::new();
        rules.insert(
            "profile".to_string(),
            Arc::new(|data: &Value| {
                let mut errors = Vec::new();
                if data.get("userId").is_none_or(Value::is_null) {
                    errors.push("Missing userId".to_string());
                }
                if data.get("displayName").is_none_or(Value::is_null) {
                    errors.push("Missing displayName".to_string());
                }
                errors
            }),
        );
        rules.insert(
            "project".to_string(),
            Arc::new(|data: &Value| {
                let mut errors = Vec::new();
                if data.get("title").is_none_or(Value::is_null) {
                    errors.push("Missing title".to_string());
                }
                if data.get("description").is_none_or(Value::is_null) {
                    errors.push("Missing description".to_string());
                }
                if !data.get("tags").is_some_and(Value::is_array) {
                    errors.push("Invalid tags".to_string());
                }
                errors
            }),
        );
        Self {
            rules: RwLock::new(rules),
            checksums: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            listeners: KeyedListeners::new(),
            clock,
        }
    }

    /// Adds or replaces the rule for `entity_type`.
    pub fn add_rule(
        &self,
        entity_type: &str,
        rule: impl Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    ) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string(), Arc::new(rule));
    }

    /// Checks `data` and records its checksum for `entity_type`.
    pub fn check_integrity(&self, entity_type: &str, data: &Value) -> IntegrityCheckResult {
        let rule = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned();

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let records: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for record in records {
            if !record.is_object() {
                errors.push("Invalid data structure".to_string());
                continue;
            }
            if let Some(rule) = &rule {
                errors.extend(rule(record));
            }
            if record.get("id").is_none() {
                push_once(&mut warnings, "Missing id field");
            }
            if record.get("createdAt").is_none() && record.get("created_at").is_none() {
                push_once(&mut warnings, "Missing createdAt timestamp");
            }
        }

        let digest = checksum(data);
        let previous = self
            .checksums
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string(), digest.clone());
        if previous.is_some_and(|p| p != digest) {
            warn!("Checksum of {entity_type} changed since the last check");
            warnings.push("Data integrity mismatch".to_string());
        }

        let result =
            IntegrityCheckResult::new(errors, warnings, self.clock.now(), Some(entity_type));
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string(), result.clone());
        self.listeners.notify(entity_type, &result);
        result
    }

    /// The checksum recorded by the last check of `entity_type`.
    pub fn stored_checksum(&self, entity_type: &str) -> Option<String> {
        self.checksums
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned()
    }

    pub fn last_result(&self, entity_type: &str) -> Option<IntegrityCheckResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned()
    }

    /// Observes checks of `entity_type`.
    pub fn subscribe(
        &self,
        entity_type: &str,
        callback: impl Fn(&IntegrityCheckResult) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(entity_type, callback)
    }

    pub fn clear_checksums(&self) {
        self.checksums
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn push_once(warnings: &mut Vec<String>, warning: &str) {
    if !warnings.iter().any(|w| w == warning) {
        warnings.push(warning.to_string());
    }
}
