mod common;

use common::{ScriptedProbe, make_clock};
use showcase_sync::{ConnectionConfig, ConnectionMonitor, ConnectionState, HttpProbe, Probe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn make_monitor(probe: Arc<ScriptedProbe>) -> ConnectionMonitor {
    ConnectionMonitor::new(probe, Arc::new(make_clock()), ConnectionConfig::default())
}

// ── State ────────────────────────────────────────────────────────

#[test]
fn starts_online_without_latency() {
    let monitor = make_monitor(Arc::new(ScriptedProbe::online(5)));
    let state = monitor.state();
    assert!(state.online);
    assert_eq!(state.latency_ms, 0);
}

#[test]
fn set_online_returns_previous_flag() {
    let monitor = make_monitor(Arc::new(ScriptedProbe::online(5)));
    assert!(monitor.set_online(false));
    assert!(!monitor.is_online());
    assert!(!monitor.set_online(true));
    assert!(monitor.is_online());
}

// ── Probing ──────────────────────────────────────────────────────

#[tokio::test]
async fn successful_probe_records_latency() {
    let monitor = make_monitor(Arc::new(ScriptedProbe::online(42)));
    let state = monitor.check_connection().await;
    assert!(state.online);
    assert_eq!(state.latency_ms, 42);
}

#[tokio::test]
async fn failed_probe_goes_offline_and_keeps_latency() {
    let probe = Arc::new(ScriptedProbe::online(42));
    let monitor = make_monitor(probe.clone());
    monitor.check_connection().await;

    probe.set_online(false);
    let state = monitor.check_connection().await;

    assert!(!state.online);
    assert_eq!(state.latency_ms, 42);
}

#[tokio::test]
async fn probe_recovers_from_offline() {
    let probe = Arc::new(ScriptedProbe::offline());
    let monitor = make_monitor(probe.clone());
    assert!(!monitor.check_connection().await.online);

    probe.set_online(true);
    probe.set_latency(7);
    let state = monitor.check_connection().await;
    assert!(state.online);
    assert_eq!(state.latency_ms, 7);
}

// ── Subscribers ──────────────────────────────────────────────────

#[tokio::test]
async fn subscriber_gets_current_state_then_changes() {
    let probe = Arc::new(ScriptedProbe::online(3));
    let monitor = make_monitor(probe.clone());
    let seen: Arc<Mutex<Vec<ConnectionState>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let sub = monitor.subscribe(move |s| sink.lock().unwrap().push(*s));

    probe.set_online(false);
    monitor.check_connection().await;

    let flags: Vec<bool> = seen.lock().unwrap().iter().map(|s| s.online).collect();
    assert_eq!(flags, vec![true, false]);

    sub.unsubscribe();
    monitor.set_online(true);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn periodic_probe_runs_on_interval() {
    let probe = Arc::new(ScriptedProbe::online(1));
    let monitor = Arc::new(make_monitor(probe.clone()));
    let task = Arc::clone(&monitor).spawn_periodic();

    tokio::time::sleep(Duration::from_secs(65)).await;
    tokio::task::yield_now().await;

    assert_eq!(probe.pings(), 2);
    task.abort();
}

// ── HTTP probe ───────────────────────────────────────────────────

#[tokio::test]
async fn http_probe_sends_no_store_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/favicon.ico"))
        .and(header("cache-control", "no-store"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let probe = HttpProbe::new(
        format!("{}/favicon.ico", server.uri()),
        Duration::from_secs(2),
    )
    .unwrap();
    assert!(probe.ping().await.is_ok());
}

#[tokio::test]
async fn http_probe_treats_any_status_as_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let probe = HttpProbe::new(server.uri(), Duration::from_secs(2)).unwrap();
    assert!(probe.ping().await.is_ok());
}

#[tokio::test]
async fn http_probe_fails_when_unreachable() {
    let probe = HttpProbe::new("http://127.0.0.1:9/favicon.ico", Duration::from_secs(2)).unwrap();
    let err = probe.ping().await.unwrap_err();
    assert!(err.is_transient());
}
