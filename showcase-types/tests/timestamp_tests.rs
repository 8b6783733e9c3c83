use proptest::prelude::*;
use showcase_types::{Clock, ManualClock, SystemClock, Timestamp};
use std::time::Duration;

// ── Timestamp ────────────────────────────────────────────────────

#[test]
fn now_is_after_2020() {
    assert!(Timestamp::now().as_millis() > 1_577_836_800_000);
}

#[test]
fn elapsed_saturates_for_future_timestamps() {
    let earlier = Timestamp::from_millis(1_000);
    let later = Timestamp::from_millis(4_500);
    assert_eq!(later.saturating_elapsed_since(earlier), 3_500);
    assert_eq!(earlier.saturating_elapsed_since(later), 0);
}

#[test]
fn plus_adds_duration() {
    let ts = Timestamp::from_millis(10);
    assert_eq!(ts.plus(Duration::from_secs(2)).as_millis(), 2_010);
}

#[test]
fn serde_is_plain_number() {
    let ts = Timestamp::from_millis(1_700_000_000_123);
    assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000123");
}

#[test]
fn display_includes_unit() {
    assert_eq!(Timestamp::from_millis(42).to_string(), "42ms");
}

// ── Clocks ───────────────────────────────────────────────────────

#[test]
fn system_clock_tracks_wall_time() {
    let before = Timestamp::now();
    let read = SystemClock.now();
    assert!(read >= before);
}

#[test]
fn manual_clock_only_moves_when_told() {
    let clock = ManualClock::new(Timestamp::from_millis(1_000));
    assert_eq!(clock.now().as_millis(), 1_000);

    clock.advance(Duration::from_millis(250));
    assert_eq!(clock.now().as_millis(), 1_250);

    clock.set(Timestamp::from_millis(5));
    assert_eq!(clock.now().as_millis(), 5);
}

#[test]
fn manual_clock_clones_share_time() {
    let clock = ManualClock::new(Timestamp::EPOCH);
    let other = clock.clone();
    clock.advance(Duration::from_secs(1));
    assert_eq!(other.now().as_millis(), 1_000);
}

proptest! {
    #[test]
    fn elapsed_after_plus_is_the_duration(start in 0u64..1_000_000_000, ms in 0u64..1_000_000) {
        let ts = Timestamp::from_millis(start);
        let later = ts.plus(Duration::from_millis(ms));
        prop_assert_eq!(later.saturating_elapsed_since(ts), ms);
    }

    #[test]
    fn ordering_matches_millis(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(Timestamp::from_millis(a) < Timestamp::from_millis(b), a < b);
    }
}
