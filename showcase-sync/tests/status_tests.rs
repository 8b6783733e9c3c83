mod common;

use common::{START_MS, make_clock};
use showcase_sync::activity::ActivityTracker;
use showcase_sync::{SyncStatus, SyncStatusTracker};
use showcase_types::Timestamp;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Sync status ──────────────────────────────────────────────────

#[test]
fn unknown_key_has_default_status() {
    let tracker = SyncStatusTracker::new(Arc::new(make_clock()));
    assert_eq!(tracker.get("projects"), SyncStatus::default());
}

#[test]
fn lifecycle_updates_fields() {
    let clock = make_clock();
    let tracker = SyncStatusTracker::new(Arc::new(clock.clone()));

    tracker.start("projects");
    assert!(tracker.get("projects").in_progress);

    tracker.fail("projects", "network error: reset");
    let failed = tracker.get("projects");
    assert!(!failed.in_progress);
    assert_eq!(failed.error.as_deref(), Some("network error: reset"));
    assert_eq!(failed.last_sync, None);

    tracker.start("projects");
    assert_eq!(tracker.get("projects").error, None);

    clock.advance(Duration::from_secs(2));
    tracker.complete("projects");
    let done = tracker.get("projects");
    assert!(!done.in_progress);
    assert_eq!(done.last_sync, Some(Timestamp::from_millis(START_MS + 2000)));
}

#[test]
fn subscribe_replays_then_follows() {
    let tracker = SyncStatusTracker::new(Arc::new(make_clock()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = tracker.subscribe("tags", move |s| sink.lock().unwrap().push(s.in_progress));

    tracker.start("tags");
    tracker.start("other");
    tracker.complete("tags");

    assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
    subscription.unsubscribe();
}

#[test]
fn clear_resets_key() {
    let tracker = SyncStatusTracker::new(Arc::new(make_clock()));
    tracker.fail("tags", "boom");
    tracker.clear("tags");
    assert_eq!(tracker.get("tags"), SyncStatus::default());
}

// ── Activity ─────────────────────────────────────────────────────

#[test]
fn idle_after_timeout() {
    let clock = make_clock();
    let activity = ActivityTracker::new(Arc::new(clock.clone()), Duration::from_secs(60));
    assert!(!activity.is_idle());

    clock.advance(Duration::from_secs(60));
    assert!(!activity.is_idle());
    clock.advance(Duration::from_millis(1));
    assert!(activity.is_idle());
    assert_eq!(activity.idle_for_ms(), 60_001);
}

#[test]
fn reactivate_reports_previous_idleness() {
    let clock = make_clock();
    let activity = ActivityTracker::new(Arc::new(clock.clone()), Duration::from_secs(60));

    assert!(!activity.reactivate());
    clock.advance(Duration::from_secs(120));
    assert!(activity.reactivate());
    assert!(!activity.is_idle());
    assert_eq!(activity.last_activity(), Timestamp::from_millis(START_MS + 120_000));
}
