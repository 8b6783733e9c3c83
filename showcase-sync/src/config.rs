//! Configuration for every manager in the sync layer.
//!
//! Each manager owns one section. All fields default to the production
//! values, so a config file only has to name what it overrides:
//!
//! ```
//! use showcase_sync::SyncConfig;
//!
//! let config = SyncConfig::from_json_str(r#"{ "cache": { "ttl_ms": 60000 } }"#).unwrap();
//! assert_eq!(config.cache.ttl_ms, 60_000);
//! assert_eq!(config.versions.max_versions, 10);
//! ```

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Fixed external resource used for reachability probes.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/favicon.ico";

/// Top-level configuration, one section per manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cache: CacheConfig,
    pub connection: ConnectionConfig,
    pub health: HealthConfig,
    pub validation: ValidationConfig,
    pub queue: QueueConfig,
    pub background: BackgroundConfig,
    pub offline: OfflineConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub orchestrator: OrchestratorConfig,
    pub versions: VersionConfig,
    pub optimistic: OptimisticConfig,
    pub remote: RemoteConfig,
}

impl SyncConfig {
    /// Parses a JSON document. Missing sections and fields take defaults.
    pub fn from_json_str(raw: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

/// Persistent page cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime (ms).
    pub ttl_ms: u64,
    /// Key prefix in the session store.
    pub key_prefix: String,
    /// How often expired entries are swept (seconds).
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30 * MINUTE_MS,
            key_prefix: "page_cache_".to_string(),
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Connection monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Resource pinged by the active probe.
    pub probe_url: String,
    /// Probe period (seconds).
    pub probe_interval_secs: u64,
    /// Per-probe timeout (ms).
    pub probe_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_interval_secs: 30,
            probe_timeout_ms: 10_000,
        }
    }
}

/// Health check manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Check period (seconds).
    pub check_interval_secs: u64,
    /// A service answering slower than this is degraded (ms).
    pub degraded_latency_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            degraded_latency_ms: 1000,
        }
    }
}

/// Data validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Records last touched longer ago than this get a staleness warning (ms).
    pub stale_after_ms: u64,
    /// Period of the cached-data sweep (seconds).
    pub sweep_interval_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: DAY_MS,
            sweep_interval_secs: 5 * 60,
        }
    }
}

/// Durable request queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Failed attempts after which a request is dropped.
    pub max_retries: u32,
    /// Durable store key holding the queue.
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            storage_key: "request_queue".to_string(),
        }
    }
}

/// Background sync tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub max_retries: u32,
    /// Processing period while online (seconds).
    pub interval_secs: u64,
    pub storage_key: String,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval_secs: 5 * 60,
            storage_key: "background_sync_tasks".to_string(),
        }
    }
}

/// Offline action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Synced actions older than this are purged (ms).
    pub retention_ms: u64,
    pub storage_key: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            retention_ms: 7 * DAY_MS,
            storage_key: "offline_actions".to_string(),
        }
    }
}

/// Batch processor defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// A batch is flushed as soon as it holds this many items.
    pub max_size: usize,
    /// Delay before a timed flush (ms).
    pub max_delay_ms: u64,
    /// A timed flush only happens with at least this many items.
    pub min_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            max_delay_ms: 1000,
            min_size: 10,
        }
    }
}

/// Keyed retry manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Each attempt is raced against this timeout (ms).
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            timeout_ms: 30_000,
        }
    }
}

/// Error recovery manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts allowed per error signature.
    pub max_attempts: u32,
    /// Pause before the network strategy retries (ms).
    pub network_retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            network_retry_delay_ms: 1000,
        }
    }
}

/// Sync orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Inactivity after which reactivation clears caches (ms).
    pub idle_timeout_ms: u64,
    /// Default interval revalidation period (ms).
    pub sync_interval_ms: u64,
    /// A key with no successful sync within this window is stale (ms).
    pub stale_threshold_ms: u64,
    /// Default dedupe window for `start_sync` (ms).
    pub deduping_interval_ms: u64,
    /// Recovery attempts per key before failures are only logged.
    pub max_recovery_attempts: u32,
    /// Strategy used when options name none.
    pub conflict_strategy: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30 * MINUTE_MS,
            sync_interval_ms: 5 * MINUTE_MS,
            stale_threshold_ms: 5 * MINUTE_MS,
            deduping_interval_ms: 2000,
            max_recovery_attempts: 3,
            conflict_strategy: "timestamp".to_string(),
        }
    }
}

/// Version tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// History entries retained per key.
    pub max_versions: usize,
    pub key_prefix: String,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_versions: 10,
            key_prefix: "version_history_".to_string(),
        }
    }
}

/// Optimistic updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
    /// How long settled updates stay visible (ms).
    pub grace_period_ms: u64,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5000,
        }
    }
}

/// Remote REST backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub base_url: String,
    /// Anonymous API key sent as `apikey` and default bearer token.
    pub api_key: String,
    /// Request timeout (seconds).
    pub timeout_secs: u64,
    /// How often the change feed polls a table (seconds).
    pub poll_interval_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            poll_interval_secs: 15,
        }
    }
}
