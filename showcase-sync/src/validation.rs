//! Structural validation of records against per-entity rules.
//!
//! Rules are keyed by entity type (`profile`, `project`, `settings` are
//! built in). An array is validated element by element. Missing metadata
//! and old timestamps only ever produce warnings.

use crate::cache::PageCache;
use crate::config::ValidationConfig;
use crate::conflict::parse_time;
use crate::listeners::{Listeners, Subscription};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showcase_types::{Clock, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

/// Checks one record, returning its errors.
pub type Rule = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// Outcome of one validation or integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ValidationResult {
    pub(crate) fn new(
        errors: Vec<String>,
        warnings: Vec<String>,
        timestamp: Timestamp,
        entity_type: Option<&str>,
    ) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            timestamp,
            entity_type: entity_type.map(str::to_string),
        }
    }
}

/// Whether `email` looks like an address.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(email))
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

fn email_errors(data: &Value) -> Vec<String> {
    match data.get("email").and_then(Value::as_str) {
        Some(email) if !email.is_empty() && !is_valid_email(email) => {
            vec!["Invalid email format".to_string()]
        }
        _ => Vec::new(),
    }
}

fn profile_rule(data: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    if !is_truthy(data.get("userId")) {
        errors.push("Missing userId".to_string());
    }
    if !is_truthy(data.get("displayName")) {
        errors.push("Missing displayName".to_string());
    }
    errors.extend(email_errors(data));
    errors
}

fn project_rule(data: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    if !is_truthy(data.get("title")) {
        errors.push("Missing title".to_string());
    }
    if !is_truthy(data.get("description")) {
        errors.push("Missing description".to_string());
    }
    if !data.get("tags").is_some_and(Value::is_array) {
        errors.push("Invalid tags structure".to_string());
    }
    if data.get("media").is_some_and(|m| !m.is_array()) {
        errors.push("Invalid media structure".to_string());
    }
    errors
}

/// Validates records and keeps the latest result per entity type.
pub struct DataValidator {
    rules: RwLock<HashMap<String, Rule>>,
    results: Mutex<HashMap<String, ValidationResult>>,
    listeners: Listeners<Vec<ValidationResult>>,
    clock: Arc<dyn Clock>,
    config: ValidationConfig,
}

impl DataValidator {
    /// Creates a validator with the built-in rules.
    pub fn new(clock: Arc<dyn Clock>, config: ValidationConfig) -> Self {
        let mut rules: HashMap<String, Rule> = HashMap::new();
        rules.insert("profile".to_string(), Arc::new(profile_rule));
        rules.insert("project".to_string(), Arc::new(project_rule));
        rules.insert("settings".to_string(), Arc::new(email_errors));
        Self {
            rules: RwLock::new(rules),
            results: Mutex::new(HashMap::new()),
            listeners: Listeners::new(),
            clock,
            config,
        }
    }

    /// Adds or replaces the rule for `entity_type`.
    pub fn register_rule(
        &self,
        entity_type: &str,
        rule: impl Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    ) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string(), Arc::new(rule));
    }

    /// Validates `data` as `entity_type`.
    pub fn validate_data(&self, entity_type: &str, data: &Value) -> ValidationResult {
        let result = self.check(entity_type, data);
        self.listeners.notify(&vec![result.clone()]);
        result
    }

    /// Validates and records the result without notifying subscribers.
    fn check(&self, entity_type: &str, data: &Value) -> ValidationResult {
        let rule = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned();
        let now = self.clock.now();

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        match data {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let (item_errors, item_warnings) = self.check_record(rule.as_ref(), item, now);
                    errors.extend(item_errors.into_iter().map(|e| format!("[{index}] {e}")));
                    for warning in item_warnings {
                        if !warnings.contains(&warning) {
                            warnings.push(warning);
                        }
                    }
                }
            }
            _ => {
                let (record_errors, record_warnings) = self.check_record(rule.as_ref(), data, now);
                errors = record_errors;
                warnings = record_warnings;
            }
        }

        let result = ValidationResult::new(errors, warnings, now, Some(entity_type));
        if !result.valid {
            debug!("Validation of {entity_type} failed: {}", result.errors.join(", "));
        }
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string(), result.clone());
        result
    }

    /// The most recent result for `entity_type`.
    pub fn last_result(&self, entity_type: &str) -> Option<ValidationResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned()
    }

    pub fn clear_results(&self) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Validates every fresh entry in `cache`, using the cache key as the
    /// entity type, and notifies subscribers with the whole batch.
    pub fn validate_cache(&self, cache: &PageCache) -> Vec<ValidationResult> {
        let results: Vec<ValidationResult> = cache
            .keys()
            .into_iter()
            .filter_map(|key| {
                let data = cache.get_value(&key)?;
                Some(self.check(&key, &data))
            })
            .collect();
        let invalid = results.iter().filter(|r| !r.valid).count();
        if invalid > 0 {
            warn!("{invalid} cached entries failed validation");
        }
        self.listeners.notify(&results);
        results
    }

    /// Observes results, one batch per validation or cache sweep.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Vec<ValidationResult>) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(callback)
    }

    /// Sweeps `cache` every `sweep_interval_secs`.
    pub fn spawn_sweep(self: Arc<Self>, cache: Arc<PageCache>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.validate_cache(&cache);
            }
        })
    }

    fn check_record(
        &self,
        rule: Option<&Rule>,
        data: &Value,
        now: Timestamp,
    ) -> (Vec<String>, Vec<String>) {
        if !data.is_object() {
            return (vec!["Invalid data structure".to_string()], Vec::new());
        }
        let errors = rule.map(|rule| rule(data)).unwrap_or_default();

        let mut warnings = Vec::new();
        let touched = ["updatedAt", "updated_at", "createdAt", "created_at"]
            .iter()
            .find_map(|field| data.get(*field).and_then(parse_time));
        if let Some(touched) = touched {
            let age = (now.as_millis() as i64).saturating_sub(touched);
            if age > self.config.stale_after_ms as i64 {
                warnings.push("Data might be stale".to_string());
            }
        }
        (errors, warnings)
    }
}
