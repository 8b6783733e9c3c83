//! Shared test doubles for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use showcase_storage::MemoryStore;
use showcase_sync::queue::{QueuedRequest, RequestProcessor, TaskHandler};
use showcase_sync::{
    BroadcastHub, Collaborators, FetchFn, Probe, SyncConfig, SyncContext, SyncError, SyncResult,
    fetch_fn,
};
use showcase_types::{ManualClock, Timestamp};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const START_MS: u64 = 1_700_000_000_000;

pub fn make_clock() -> ManualClock {
    ManualClock::new(Timestamp::from_millis(START_MS))
}

/// A probe whose reachability and latency are set by the test.
pub struct ScriptedProbe {
    online: AtomicBool,
    latency_ms: AtomicU64,
    pings: AtomicUsize,
}

impl ScriptedProbe {
    pub fn online(latency_ms: u64) -> Self {
        Self {
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(latency_ms),
            pings: AtomicUsize::new(0),
        }
    }

    pub fn offline() -> Self {
        let probe = Self::online(0);
        probe.set_online(false);
        probe
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn ping(&self) -> SyncResult<Duration> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(self.latency_ms.load(Ordering::SeqCst)))
        } else {
            Err(SyncError::Network("unreachable".into()))
        }
    }
}

/// Records every request it is given; fails while `failures` is positive.
#[derive(Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
    failures: AtomicUsize,
    always_fail: AtomicBool,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let processor = Self::default();
        processor.always_fail.store(true, Ordering::SeqCst);
        processor
    }

    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Endpoints of every attempt, failed ones included.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn attempt(&self, label: &str) -> SyncResult<()> {
        self.seen.lock().unwrap().push(label.to_string());
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("backend down".into()));
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Network("backend down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestProcessor for RecordingProcessor {
    async fn process(&self, request: &QueuedRequest) -> SyncResult<()> {
        self.attempt(&request.endpoint)
    }
}

/// Records handled task kinds; kinds in the failing set always fail.
#[derive(Default)]
pub struct RecordingHandler {
    handled: Mutex<Vec<(String, Value)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_kind(&self, kind: &str) {
        self.failing.lock().unwrap().insert(kind.to_string());
    }

    pub fn recover_kind(&self, kind: &str) {
        self.failing.lock().unwrap().remove(kind);
    }

    /// Kinds of every attempt, failed ones included.
    pub fn kinds(&self) -> Vec<String> {
        self.handled
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, kind: &str, data: &Value) -> SyncResult<()> {
        self.handled
            .lock()
            .unwrap()
            .push((kind.to_string(), data.clone()));
        if self.failing.lock().unwrap().contains(kind) {
            return Err(SyncError::Remote {
                status: 503,
                message: format!("{kind} unavailable"),
            });
        }
        Ok(())
    }
}

/// Production defaults with the network recovery pause removed.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.recovery.network_retry_delay_ms = 0;
    config
}

/// A context wired to test doubles, plus handles on them.
pub struct ContextFixture {
    pub context: Arc<SyncContext>,
    pub clock: ManualClock,
    pub probe: Arc<ScriptedProbe>,
    pub processor: Arc<RecordingProcessor>,
    pub handler: Arc<RecordingHandler>,
    pub hub: BroadcastHub,
    pub durable: Arc<MemoryStore>,
}

pub fn make_context() -> ContextFixture {
    make_context_on(BroadcastHub::default(), test_config())
}

/// Builds a context attached to `hub`, so several fixtures can act as tabs
/// of one origin.
pub fn make_context_on(hub: BroadcastHub, config: SyncConfig) -> ContextFixture {
    let clock = make_clock();
    let probe = Arc::new(ScriptedProbe::online(20));
    let processor = Arc::new(RecordingProcessor::new());
    let handler = Arc::new(RecordingHandler::new());
    let durable = Arc::new(MemoryStore::new());
    let context = SyncContext::new(
        config,
        Collaborators {
            session_store: Arc::new(MemoryStore::new()),
            durable_store: durable.clone(),
            hub: hub.clone(),
            probe: probe.clone(),
            processor: processor.clone(),
            task_handler: handler.clone(),
            clock: Arc::new(clock.clone()),
        },
    );
    ContextFixture {
        context,
        clock,
        probe,
        processor,
        handler,
        hub,
        durable,
    }
}

/// What a scripted fetch answers next; `Err` becomes a network error.
pub type Script = Arc<Mutex<Result<Value, String>>>;

pub fn make_script(value: Value) -> Script {
    Arc::new(Mutex::new(Ok(value)))
}

/// A fetch that answers from `script` and counts calls.
pub fn make_fetch(script: &Script, calls: &Arc<AtomicUsize>) -> FetchFn {
    let script = Arc::clone(script);
    let calls = Arc::clone(calls);
    fetch_fn(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let next = script.lock().unwrap().clone().map_err(SyncError::Network);
        async move { next }
    })
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
