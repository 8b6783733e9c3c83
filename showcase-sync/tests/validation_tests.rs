mod common;

use common::{START_MS, make_clock};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use showcase_storage::MemoryStore;
use showcase_sync::validation::is_valid_email;
use showcase_sync::{CacheConfig, DataValidator, PageCache, ValidationConfig, ValidationResult};
use std::sync::{Arc, Mutex};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn make_validator() -> DataValidator {
    DataValidator::new(Arc::new(make_clock()), ValidationConfig::default())
}

fn make_project() -> Value {
    json!({
        "id": "p1",
        "title": "Solar kiln",
        "description": "Dries timber with sunlight",
        "tags": ["energy"],
    })
}

// ── Built-in rules ───────────────────────────────────────────────

#[test]
fn complete_project_is_valid() {
    let result = make_validator().validate_data("project", &make_project());
    assert!(result.valid);
    assert!(result.errors.is_empty());
    assert_eq!(result.entity_type.as_deref(), Some("project"));
}

#[test]
fn project_with_only_title() {
    let result = make_validator().validate_data("project", &json!({"title": "x"}));
    assert!(!result.valid);
    assert_eq!(
        result.errors,
        vec![
            "Missing description".to_string(),
            "Invalid tags structure".to_string(),
        ]
    );
}

#[test]
fn project_media_must_be_array_when_present() {
    let mut project = make_project();
    project["media"] = json!("cover.png");
    let result = make_validator().validate_data("project", &project);
    assert_eq!(result.errors, vec!["Invalid media structure".to_string()]);

    project["media"] = json!([]);
    assert!(make_validator().validate_data("project", &project).valid);
}

#[test]
fn empty_string_counts_as_missing() {
    let mut project = make_project();
    project["title"] = json!("");
    let result = make_validator().validate_data("project", &project);
    assert_eq!(result.errors, vec!["Missing title".to_string()]);
}

#[test]
fn profile_rule() {
    let validator = make_validator();
    let result = validator.validate_data("profile", &json!({"email": "nope"}));
    assert_eq!(
        result.errors,
        vec![
            "Missing userId".to_string(),
            "Missing displayName".to_string(),
            "Invalid email format".to_string(),
        ]
    );

    let ok = json!({"userId": "u1", "displayName": "Ada", "email": "ada@example.com"});
    assert!(validator.validate_data("profile", &ok).valid);
}

#[test]
fn settings_only_checks_email() {
    let validator = make_validator();
    assert!(validator.validate_data("settings", &json!({})).valid);
    assert!(!validator.validate_data("settings", &json!({"email": "a@b"})).valid);
}

#[test]
fn email_pattern() {
    assert!(is_valid_email("someone@example.org"));
    assert!(!is_valid_email("someone@example"));
    assert!(!is_valid_email("some one@example.org"));
    assert!(!is_valid_email("@example.org"));
}

// ── Shapes ───────────────────────────────────────────────────────

#[test]
fn non_object_is_invalid_structure() {
    let result = make_validator().validate_data("project", &json!(42));
    assert_eq!(result.errors, vec!["Invalid data structure".to_string()]);
}

#[test]
fn unknown_entity_type_only_checks_structure() {
    let validator = make_validator();
    assert!(validator.validate_data("widget", &json!({})).valid);
    assert!(!validator.validate_data("widget", &json!("text")).valid);
}

#[test]
fn arrays_are_validated_per_element() {
    let data = json!([
        make_project(),
        {"title": "x", "description": "y", "tags": []},
        {"description": "d", "tags": []},
    ]);
    let result = make_validator().validate_data("project", &data);
    assert_eq!(result.errors, vec!["[2] Missing title".to_string()]);
}

#[test]
fn empty_array_is_valid() {
    assert!(make_validator().validate_data("project", &json!([])).valid);
}

// ── Staleness ────────────────────────────────────────────────────

#[test]
fn old_record_gets_stale_warning() {
    let mut project = make_project();
    project["updatedAt"] = json!(START_MS - 2 * DAY_MS);
    let result = make_validator().validate_data("project", &project);

    assert!(result.valid);
    assert_eq!(result.warnings, vec!["Data might be stale".to_string()]);
}

#[test]
fn recent_rfc3339_timestamp_is_not_stale() {
    let mut project = make_project();
    let recent = chrono::DateTime::from_timestamp_millis((START_MS - 1000) as i64).unwrap();
    project["created_at"] = json!(recent.to_rfc3339());
    let result = make_validator().validate_data("project", &project);
    assert!(result.warnings.is_empty());
}

#[test]
fn far_past_timestamps_are_stale() {
    let validator = make_validator();
    for touched in [json!(-1e300), json!(i64::MIN)] {
        let mut project = make_project();
        project["updatedAt"] = touched;
        let result = validator.validate_data("project", &project);

        assert!(result.valid);
        assert_eq!(result.warnings, vec!["Data might be stale".to_string()]);
    }
}

#[test]
fn far_future_timestamp_is_not_stale() {
    let mut project = make_project();
    project["updatedAt"] = json!(i64::MAX);
    let result = make_validator().validate_data("project", &project);
    assert!(result.warnings.is_empty());
}

// ── Registry & results ───────────────────────────────────────────

#[test]
fn registered_rule_replaces_builtin() {
    let validator = make_validator();
    validator.register_rule("project", |data: &Value| {
        if data.get("slug").is_none() {
            vec!["Missing slug".to_string()]
        } else {
            Vec::new()
        }
    });
    let result = validator.validate_data("project", &json!({}));
    assert_eq!(result.errors, vec!["Missing slug".to_string()]);
}

#[test]
fn last_result_is_kept_per_type() {
    let validator = make_validator();
    validator.validate_data("project", &json!({}));
    validator.validate_data("profile", &json!({"userId": "u", "displayName": "d"}));

    assert!(!validator.last_result("project").unwrap().valid);
    assert!(validator.last_result("profile").unwrap().valid);

    validator.clear_results();
    assert_eq!(validator.last_result("project"), None);
}

#[test]
fn subscribers_get_each_result() {
    let validator = make_validator();
    let seen: Arc<Mutex<Vec<Vec<ValidationResult>>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = validator.subscribe(move |batch| sink.lock().unwrap().push(batch.clone()));

    validator.validate_data("project", &make_project());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].len(), 1);
    assert!(seen[0][0].valid);
}

#[test]
fn validate_cache_uses_keys_as_types() {
    let clock = make_clock();
    let cache = PageCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        CacheConfig::default(),
    );
    cache.set_value("project", json!({"title": "x"}));
    cache.set_value("profile", json!({"userId": "u", "displayName": "d"}));
    let validator = DataValidator::new(Arc::new(clock), ValidationConfig::default());

    let results = validator.validate_cache(&cache);

    assert_eq!(results.len(), 2);
    let invalid: Vec<_> = results
        .iter()
        .filter(|r| !r.valid)
        .filter_map(|r| r.entity_type.clone())
        .collect();
    assert_eq!(invalid, vec!["project".to_string()]);
}

#[test]
fn validate_cache_notifies_once_per_sweep() {
    let clock = make_clock();
    let cache = PageCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        CacheConfig::default(),
    );
    cache.set_value("project", json!({"title": "x"}));
    cache.set_value("profile", json!({"userId": "u", "displayName": "d"}));
    let validator = DataValidator::new(Arc::new(clock), ValidationConfig::default());
    let seen: Arc<Mutex<Vec<Vec<ValidationResult>>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = validator.subscribe(move |batch| sink.lock().unwrap().push(batch.clone()));

    validator.validate_cache(&cache);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].len(), 2);
    assert!(validator.last_result("project").is_some());
}
