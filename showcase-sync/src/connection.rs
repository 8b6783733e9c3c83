//! Online/offline tracking and active reachability probes.

use crate::config::ConnectionConfig;
use crate::error::{SyncError, SyncResult};
use crate::listeners::{Listeners, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use showcase_types::{Clock, Timestamp};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Something that can check whether the network is reachable.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Performs one round trip and returns its latency.
    async fn ping(&self) -> SyncResult<Duration>;
}

/// Probes a fixed URL with a cache-bypassing GET.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build probe client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &ConnectionConfig) -> SyncResult<Self> {
        Self::new(
            config.probe_url.clone(),
            Duration::from_millis(config.probe_timeout_ms),
        )
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn ping(&self) -> SyncResult<Duration> {
        let started = Instant::now();
        // Any answer at all means the network is up, whatever the status.
        self.client
            .get(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?;
        Ok(started.elapsed())
    }
}

/// Snapshot of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub online: bool,
    pub last_checked: Timestamp,
    /// Latency of the last successful probe (ms).
    pub latency_ms: u64,
}

/// Tracks the online flag and probe latency.
pub struct ConnectionMonitor {
    state: RwLock<ConnectionState>,
    listeners: Listeners<ConnectionState>,
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    config: ConnectionConfig,
}

impl ConnectionMonitor {
    /// Creates a monitor that starts out online.
    pub fn new(probe: Arc<dyn Probe>, clock: Arc<dyn Clock>, config: ConnectionConfig) -> Self {
        let state = ConnectionState {
            online: true,
            last_checked: clock.now(),
            latency_ms: 0,
        };
        Self {
            state: RwLock::new(state),
            listeners: Listeners::new(),
            probe,
            clock,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// Records an online/offline event from the host. Returns the previous
    /// online flag.
    pub fn set_online(&self, online: bool) -> bool {
        self.update(online, None)
    }

    /// Probes the network once and records the result.
    ///
    /// A failed probe marks the connection offline; latency keeps its
    /// previous value.
    pub async fn check_connection(&self) -> ConnectionState {
        match self.probe.ping().await {
            Ok(latency) => {
                self.update(true, Some(latency.as_millis() as u64));
            }
            Err(e) => {
                debug!("Connection probe failed: {e}");
                self.update(false, None);
            }
        }
        self.state()
    }

    /// Observes every state change. The current state is replayed
    /// immediately.
    pub fn subscribe(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        callback(&self.state());
        self.listeners.subscribe(callback)
    }

    /// Probes every `probe_interval_secs`.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.probe_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check_connection().await;
            }
        })
    }

    fn update(&self, online: bool, latency_ms: Option<u64>) -> bool {
        let (previous, next) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let previous = state.online;
            *state = ConnectionState {
                online,
                last_checked: self.clock.now(),
                latency_ms: latency_ms.filter(|l| *l > 0).unwrap_or(state.latency_ms),
            };
            (previous, *state)
        };
        if previous != online {
            info!("Connection is now {}", if online { "online" } else { "offline" });
        }
        self.listeners.notify(&next);
        previous
    }
}
