//! Periodic health checks of storage and network.

use crate::config::HealthConfig;
use crate::connection::Probe;
use crate::listeners::{Listeners, Subscription};
use serde::{Deserialize, Serialize};
use showcase_storage::KvStore;
use showcase_types::{Clock, Timestamp};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const PROBE_KEY: &str = "health_check";

pub const DURABLE_STORAGE: &str = "durable_storage";
pub const FAST_STORAGE: &str = "fast_storage";
pub const NETWORK: &str = "network";

/// Health of one probed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    pub latency_ms: u64,
}

/// Result of the latest health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Timestamp,
    pub issues: Vec<String>,
    pub services: BTreeMap<String, ServiceHealth>,
}

/// Probes durable storage, fast storage and the network.
pub struct HealthMonitor {
    durable: Arc<dyn KvStore>,
    fast: Arc<dyn KvStore>,
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    status: RwLock<HealthStatus>,
    listeners: Listeners<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(
        durable: Arc<dyn KvStore>,
        fast: Arc<dyn KvStore>,
        probe: Arc<dyn Probe>,
        clock: Arc<dyn Clock>,
        config: HealthConfig,
    ) -> Self {
        let status = HealthStatus {
            healthy: true,
            last_check: clock.now(),
            issues: Vec::new(),
            services: BTreeMap::new(),
        };
        Self {
            durable,
            fast,
            probe,
            clock,
            config,
            status: RwLock::new(status),
            listeners: Listeners::new(),
        }
    }

    /// The latest recorded status.
    pub fn status(&self) -> HealthStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Probes every service and records the result.
    pub async fn check_health(&self) -> HealthStatus {
        let mut issues = Vec::new();
        let mut services = BTreeMap::new();

        for (name, store, issue) in [
            (DURABLE_STORAGE, &self.durable, "Durable storage unavailable"),
            (FAST_STORAGE, &self.fast, "Fast storage unavailable"),
        ] {
            let health = match self.probe_store(store.as_ref()) {
                Some(latency) => self.rate(latency),
                None => {
                    issues.push(issue.to_string());
                    ServiceHealth {
                        status: ServiceStatus::Down,
                        latency_ms: 0,
                    }
                }
            };
            services.insert(name.to_string(), health);
        }

        let network = match self.probe.ping().await {
            Ok(latency) => self.rate(latency),
            Err(e) => {
                debug!("Network health probe failed: {e}");
                issues.push("Network connectivity issues".to_string());
                ServiceHealth {
                    status: ServiceStatus::Down,
                    latency_ms: 0,
                }
            }
        };
        services.insert(NETWORK.to_string(), network);

        if !issues.is_empty() {
            warn!("Health check found issues: {}", issues.join(", "));
        }
        let status = HealthStatus {
            healthy: issues.is_empty(),
            last_check: self.clock.now(),
            issues,
            services,
        };
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status.clone();
        self.listeners.notify(&status);
        status
    }

    /// Observes every check. The current status is replayed immediately.
    pub fn subscribe(
        &self,
        callback: impl Fn(&HealthStatus) + Send + Sync + 'static,
    ) -> Subscription {
        callback(&self.status());
        self.listeners.subscribe(callback)
    }

    /// Checks every `check_interval_secs`.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check_health().await;
            }
        })
    }

    fn probe_store(&self, store: &dyn KvStore) -> Option<Duration> {
        let started = Instant::now();
        store.set(PROBE_KEY, "test").ok()?;
        store.delete(PROBE_KEY).ok()?;
        Some(started.elapsed())
    }

    fn rate(&self, latency: Duration) -> ServiceHealth {
        let latency_ms = latency.as_millis() as u64;
        let status = if latency_ms > self.config.degraded_latency_ms {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Healthy
        };
        ServiceHealth { status, latency_ms }
    }
}
