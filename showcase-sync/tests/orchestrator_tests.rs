mod common;

use common::{
    START_MS, eventually, make_context, make_context_on, make_fetch, make_script, test_config,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use showcase_sync::{FetchFn, MessageKind, SyncOptions, SyncPhase, fetch_fn};
use showcase_types::{Identity, Role};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

fn make_calls() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// Resolves with `value` once `gate` is notified.
fn make_gated_fetch(gate: &Arc<Notify>, value: serde_json::Value) -> FetchFn {
    let gate = Arc::clone(gate);
    fetch_fn(move || {
        let gate = Arc::clone(&gate);
        let value = value.clone();
        async move {
            gate.notified().await;
            Ok(value)
        }
    })
}

fn make_profile(name: &str, updated_at: u64) -> serde_json::Value {
    json!({"id": "u1", "userId": "u1", "displayName": name, "updatedAt": updated_at})
}

fn make_project(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": "Portfolio site",
        "description": "Static pages",
        "tags": ["rust"],
        "createdAt": START_MS,
    })
}

// ── Phases ───────────────────────────────────────────────────────

#[test]
fn phase_transitions() {
    assert!(SyncPhase::Idle.can_transition_to(SyncPhase::Syncing));
    assert!(SyncPhase::Syncing.can_transition_to(SyncPhase::Resolved));
    assert!(SyncPhase::Syncing.can_transition_to(SyncPhase::Failed));
    assert!(SyncPhase::Failed.can_transition_to(SyncPhase::Idle));
    assert!(!SyncPhase::Idle.can_transition_to(SyncPhase::Resolved));
    assert!(!SyncPhase::Resolved.can_transition_to(SyncPhase::Syncing));
}

#[test]
fn options_follow_config() {
    let mut config = test_config().orchestrator;
    config.deduping_interval_ms = 500;
    config.conflict_strategy = "object-merge".to_string();

    let options = SyncOptions::from_config(&config).entity_type("profile");
    assert_eq!(options.deduping_interval, Duration::from_millis(500));
    assert_eq!(options.conflict_strategy, "object-merge");
    assert_eq!(options.entity_type.as_deref(), Some("profile"));
    assert!(options.revalidate_on_focus);
    assert!(!options.revalidate_on_interval);
}

// ── Sync cycle ───────────────────────────────────────────────────

#[tokio::test]
async fn successful_sync_caches_versions_and_broadcasts() {
    let f = make_context();
    let mut other_tab = f.hub.receiver();
    let value = json!([{"id": "t1", "name": "rust"}]);
    let calls = make_calls();

    f.context
        .orchestrator()
        .start_sync("tags", make_fetch(&make_script(value.clone()), &calls), SyncOptions::default())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.context.cache().get_value("tags"), Some(value.clone()));
    assert_eq!(f.context.versions().latest("tags").unwrap().version, 1);
    assert_eq!(f.context.orchestrator().phase("tags"), SyncPhase::Resolved);
    assert!(!f.context.is_stale("tags"));

    let status = f.context.status().get("tags");
    assert!(!status.in_progress);
    assert_eq!(status.error, None);
    assert!(status.last_sync.is_some());

    let message = other_tab.try_recv().unwrap();
    assert_eq!(message.kind, MessageKind::DataUpdate);
    assert_eq!(message.key.as_deref(), Some("tags"));
    assert_eq!(message.data, Some(value));
}

#[tokio::test]
async fn start_sync_dedupes_within_window() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let script = make_script(json!([]));
    let calls = make_calls();

    orchestrator
        .start_sync("tags", make_fetch(&script, &calls), SyncOptions::default())
        .await;
    f.clock.advance(Duration::from_millis(1999));
    orchestrator
        .start_sync("tags", make_fetch(&script, &calls), SyncOptions::default())
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    f.clock.advance(Duration::from_millis(1));
    orchestrator
        .start_sync("tags", make_fetch(&script, &calls), SyncOptions::default())
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn revalidate_ignores_dedupe_window() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let calls = make_calls();
    orchestrator
        .start_sync("tags", make_fetch(&make_script(json!([])), &calls), SyncOptions::default())
        .await;

    assert!(orchestrator.revalidate("tags").await);
    assert!(!orchestrator.revalidate("unbound").await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.context.versions().history("tags").len(), 2);
}

#[tokio::test]
async fn rebinding_replaces_fetch() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let first = make_calls();
    let second = make_calls();
    orchestrator
        .start_sync("tags", make_fetch(&make_script(json!([])), &first), SyncOptions::default())
        .await;
    orchestrator
        .start_sync("tags", make_fetch(&make_script(json!([])), &second), SyncOptions::default())
        .await;

    orchestrator.revalidate("tags").await;
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.active_keys(), vec!["tags".to_string()]);
}

// ── Checks ───────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_data_keeps_previous_value() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let good = json!([make_project("p1")]);
    let script = make_script(good.clone());
    let options = SyncOptions::default().entity_type("project");
    orchestrator
        .start_sync("projects", make_fetch(&script, &make_calls()), options)
        .await;

    *script.lock().unwrap() = Ok(json!([{"id": "p2", "title": "x"}]));
    orchestrator.revalidate("projects").await;

    assert_eq!(f.context.cache().get_value("projects"), Some(good));
    assert_eq!(f.context.versions().history("projects").len(), 1);
    assert_eq!(
        f.context.status().get("projects").error.as_deref(),
        Some("validation failed: [0] Missing description, [0] Invalid tags structure")
    );
    assert_eq!(orchestrator.phase("projects"), SyncPhase::Idle);
}

#[tokio::test]
async fn integrity_failure_aborts_sync() {
    let f = make_context();
    let options = SyncOptions {
        validate_data: false,
        ..SyncOptions::default()
    };
    f.context
        .orchestrator()
        .start_sync("likes", make_fetch(&make_script(json!(["not a row"])), &make_calls()), options)
        .await;

    assert_eq!(f.context.cache().get_value("likes"), None);
    assert_eq!(
        f.context.status().get("likes").error.as_deref(),
        Some("integrity check failed: Invalid data structure")
    );
}

// ── Conflicts ────────────────────────────────────────────────────

#[tokio::test]
async fn newer_local_copy_wins() {
    let f = make_context();
    let local = make_profile("Local", START_MS + 10);
    let remote = make_profile("Remote", START_MS);
    f.context.cache().set_value("profile", local.clone());

    f.context
        .orchestrator()
        .start_sync(
            "profile",
            make_fetch(&make_script(remote), &make_calls()),
            SyncOptions::default(),
        )
        .await;

    assert_eq!(f.context.cache().get_value("profile"), Some(local.clone()));
    assert_eq!(f.context.versions().latest("profile").unwrap().data, local);
}

#[tokio::test]
async fn newer_remote_copy_wins() {
    let f = make_context();
    let local = make_profile("Local", START_MS);
    let remote = make_profile("Remote", START_MS + 10);
    f.context.cache().set_value("profile", local);

    f.context
        .orchestrator()
        .start_sync(
            "profile",
            make_fetch(&make_script(remote.clone()), &make_calls()),
            SyncOptions::default(),
        )
        .await;

    assert_eq!(f.context.cache().get_value("profile"), Some(remote));
}

#[tokio::test]
async fn unknown_strategy_fails_sync() {
    let f = make_context();
    f.context.cache().set_value("tags", json!([{"id": "old"}]));
    let options = SyncOptions {
        conflict_strategy: "coin-flip".to_string(),
        ..SyncOptions::default()
    };

    f.context
        .orchestrator()
        .start_sync(
            "tags",
            make_fetch(&make_script(json!([{"id": "new"}])), &make_calls()),
            options,
        )
        .await;

    assert_eq!(f.context.cache().get_value("tags"), Some(json!([{"id": "old"}])));
    assert_eq!(
        f.context.status().get("tags").error.as_deref(),
        Some("no resolution strategy found for: coin-flip")
    );
}

// ── Auth gating ──────────────────────────────────────────────────

#[tokio::test]
async fn require_auth_waits_for_identity() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let calls = make_calls();
    let options = SyncOptions {
        require_auth: true,
        ..SyncOptions::default()
    };

    orchestrator
        .start_sync("likes", make_fetch(&make_script(json!([])), &calls), options)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        f.context.status().get("likes").error.as_deref(),
        Some("Authentication required")
    );

    orchestrator.set_identity(Some(Identity::new("u1", Role::User)));
    orchestrator.revalidate("likes").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.context.status().get("likes").error, None);
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn stop_sync_forgets_key() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    orchestrator
        .start_sync(
            "tags",
            make_fetch(&make_script(json!([])), &make_calls()),
            SyncOptions::default(),
        )
        .await;

    orchestrator.stop_sync("tags");
    orchestrator.stop_sync("tags");

    assert!(!orchestrator.revalidate("tags").await);
    assert!(orchestrator.active_keys().is_empty());
    assert_eq!(orchestrator.last_sync("tags"), None);
    assert_eq!(orchestrator.phase("tags"), SyncPhase::Idle);
    assert!(orchestrator.is_stale("tags"));
    assert!(!f.context.tabs().has_listeners("tags"));
}

#[tokio::test]
async fn stop_sync_discards_in_flight_fetch() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let mut other_tab = f.hub.receiver();
    let gate = Arc::new(Notify::new());

    tokio::join!(
        orchestrator.start_sync(
            "tags",
            make_gated_fetch(&gate, json!([{"id": "t1", "name": "rust"}])),
            SyncOptions::default(),
        ),
        async {
            while !f.context.status().get("tags").in_progress {
                tokio::task::yield_now().await;
            }
            orchestrator.stop_sync("tags");
            gate.notify_one();
        }
    );

    assert!(orchestrator.active_keys().is_empty());
    assert_eq!(orchestrator.last_sync("tags"), None);
    assert!(orchestrator.is_stale("tags"));
    assert_eq!(orchestrator.phase("tags"), SyncPhase::Idle);
    assert_eq!(f.context.cache().get_value("tags"), None);
    assert!(f.context.versions().history("tags").is_empty());
    assert!(!f.context.status().get("tags").in_progress);
    assert!(other_tab.try_recv().is_err());
}

#[tokio::test]
async fn rebinding_during_fetch_applies_new_fetch() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let gate = Arc::new(Notify::new());
    let second = make_calls();
    let replacement = json!([{"id": "t2", "name": "go"}]);

    tokio::join!(
        orchestrator.start_sync(
            "tags",
            make_gated_fetch(&gate, json!([{"id": "t1", "name": "rust"}])),
            SyncOptions::default(),
        ),
        async {
            while !f.context.status().get("tags").in_progress {
                tokio::task::yield_now().await;
            }
            orchestrator
                .start_sync(
                    "tags",
                    make_fetch(&make_script(replacement.clone()), &second),
                    SyncOptions::default(),
                )
                .await;
            gate.notify_one();
        }
    );

    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(f.context.cache().get_value("tags"), Some(replacement.clone()));
    let history = f.context.versions().history("tags");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].data, replacement);
    assert_eq!(orchestrator.phase("tags"), SyncPhase::Resolved);
}

#[tokio::test]
async fn staleness_threshold() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    assert!(orchestrator.is_stale("tags"));

    orchestrator
        .start_sync(
            "tags",
            make_fetch(&make_script(json!([])), &make_calls()),
            SyncOptions::default(),
        )
        .await;
    f.clock.advance(Duration::from_secs(5 * 60));
    assert!(!orchestrator.is_stale("tags"));
    f.clock.advance(Duration::from_millis(1));
    assert!(orchestrator.is_stale("tags"));
}

#[tokio::test]
async fn worker_starts_once() {
    let f = make_context();
    let worker = f.context.orchestrator().spawn_worker().unwrap();
    assert!(f.context.orchestrator().spawn_worker().is_none());
    worker.abort();
}

// ── Recovery ─────────────────────────────────────────────────────

#[tokio::test]
async fn network_failure_is_retried_by_worker() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let worker = orchestrator.spawn_worker().unwrap();
    let script = make_script(json!([]));
    *script.lock().unwrap() = Err("connection reset".to_string());
    let calls = make_calls();

    orchestrator
        .start_sync("tags", make_fetch(&script, &calls), SyncOptions::default())
        .await;
    assert_eq!(
        f.context.status().get("tags").error.as_deref(),
        Some("network error: connection reset")
    );

    *script.lock().unwrap() = Ok(json!([{"id": "t1"}]));
    assert!(eventually(|| f.context.cache().get_value("tags").is_some()).await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.context.status().get("tags").error, None);
    worker.abort();
}

#[tokio::test]
async fn persistent_failure_stops_after_budget() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let worker = orchestrator.spawn_worker().unwrap();
    let script = make_script(json!([]));
    *script.lock().unwrap() = Err("connection reset".to_string());
    let calls = make_calls();

    orchestrator
        .start_sync("tags", make_fetch(&script, &calls), SyncOptions::default())
        .await;

    // The first run plus one retry per recovery attempt.
    assert!(eventually(|| calls.load(Ordering::SeqCst) == 4).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    worker.abort();
}

// ── Revalidation triggers ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn interval_revalidation() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let worker = orchestrator.spawn_worker().unwrap();
    let calls = make_calls();
    let options = SyncOptions {
        revalidate_on_interval: true,
        interval: Duration::from_secs(1),
        ..SyncOptions::default()
    };

    orchestrator
        .start_sync("feed", make_fetch(&make_script(json!([])), &calls), options)
        .await;
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    orchestrator.stop_sync("feed");
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    worker.abort();
}

#[tokio::test]
async fn focus_revalidates_opted_in_keys() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let focused = make_calls();
    let unfocused = make_calls();
    orchestrator
        .start_sync("tags", make_fetch(&make_script(json!([])), &focused), SyncOptions::default())
        .await;
    let options = SyncOptions {
        revalidate_on_focus: false,
        ..SyncOptions::default()
    };
    orchestrator
        .start_sync("likes", make_fetch(&make_script(json!([])), &unfocused), options)
        .await;

    orchestrator.on_visible().await;

    assert_eq!(focused.load(Ordering::SeqCst), 2);
    assert_eq!(unfocused.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reactivation_after_idle_clears_cache() {
    let f = make_context();
    let orchestrator = f.context.orchestrator();
    let calls = make_calls();
    let options = SyncOptions {
        revalidate_on_focus: false,
        ..SyncOptions::default()
    };
    orchestrator
        .start_sync("likes", make_fetch(&make_script(json!([])), &calls), options)
        .await;
    f.context.cache().set_value("scratch", json!({"draft": true}));

    f.clock.advance(Duration::from_secs(31 * 60));
    orchestrator.on_visible().await;

    assert_eq!(f.context.cache().get_value("scratch"), None);
    assert_eq!(f.context.cache().get_value("likes"), Some(json!([])));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(f.context.get_health().services.contains_key("network"));
}

// ── Cross-tab ────────────────────────────────────────────────────

#[tokio::test]
async fn updates_from_other_tab_are_applied() {
    let first = make_context();
    let second = make_context_on(first.hub.clone(), test_config());
    second.context.start();
    let second_calls = make_calls();
    second
        .context
        .orchestrator()
        .start_sync(
            "tags",
            make_fetch(&make_script(json!([])), &second_calls),
            SyncOptions::default(),
        )
        .await;

    let fresh = json!([{"id": "t9", "name": "wasm"}]);
    first
        .context
        .orchestrator()
        .start_sync(
            "tags",
            make_fetch(&make_script(fresh.clone()), &make_calls()),
            SyncOptions::default(),
        )
        .await;

    assert!(eventually(|| second.context.cache().get_value("tags") == Some(fresh.clone())).await);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    second.context.shutdown();
}

#[tokio::test]
async fn invalidation_from_other_tab_triggers_refetch() {
    let first = make_context();
    let second = make_context_on(first.hub.clone(), test_config());
    second.context.start();
    let calls = make_calls();
    second
        .context
        .orchestrator()
        .start_sync("tags", make_fetch(&make_script(json!([])), &calls), SyncOptions::default())
        .await;

    first
        .context
        .tabs()
        .broadcast(MessageKind::CacheInvalidate, Some("tags"), None);

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 2).await);
    second.context.shutdown();
}

#[tokio::test]
async fn invalid_update_from_other_tab_is_rejected() {
    let first = make_context();
    let second = make_context_on(first.hub.clone(), test_config());
    let good = json!([make_project("p1")]);
    second
        .context
        .orchestrator()
        .start_sync(
            "projects",
            make_fetch(&make_script(good.clone()), &make_calls()),
            SyncOptions::default().entity_type("project"),
        )
        .await;

    let mut message = showcase_sync::TabMessage {
        origin: first.context.tabs().tab_id(),
        kind: MessageKind::DataUpdate,
        key: Some("projects".to_string()),
        data: Some(json!([{"id": "p1"}])),
        timestamp: showcase_types::Timestamp::from_millis(START_MS),
    };
    second.context.tabs().deliver(&message);
    assert_eq!(second.context.cache().get_value("projects"), Some(good));

    let better = json!([make_project("p2")]);
    message.data = Some(better.clone());
    second.context.tabs().deliver(&message);
    assert_eq!(second.context.cache().get_value("projects"), Some(better));
}
