//! Client-side sync and caching layer for the project showcase.
//!
//! Keeps locally cached copies of backend data fresh and consistent across
//! tabs, network interruptions and idle periods.
//!
//! # Architecture
//!
//! Every piece is an explicitly constructed manager; [`SyncContext`] builds
//! one of each and wires them together.
//!
//! ## Components
//!
//! - **Cache**: two-tier (memory + session store) TTL cache of JSON values
//! - **Broadcast**: cross-tab messages over a shared channel
//! - **Monitors**: connectivity and service health probes
//! - **Checks**: schema validation, integrity checksums, conflict resolution
//! - **Queue**: durable request queue, background tasks, offline log, batching
//! - **Recovery**: retry with backoff and signature-keyed error recovery
//! - **Orchestrator**: the per-key fetch → check → reconcile → cache cycle
//! - **Remote**: the backend boundary, REST over HTTP or in memory
//!
//! ## Sync Cycle
//!
//! 1. **Dedupe**: skip keys that synced within the dedupe window
//! 2. **Fetch**: run the key's fetch function
//! 3. **Check**: validate and integrity-check the fetched value
//! 4. **Reconcile**: resolve it against the cached value
//! 5. **Publish**: cache it, version it and broadcast it to other tabs
//!
//! # Example
//!
//! ```
//! use showcase_sync::{SyncConfig, SyncOptions};
//!
//! let config = SyncConfig::default();
//! let options = SyncOptions {
//!     revalidate_on_interval: true,
//!     ..SyncOptions::from_config(&config.orchestrator)
//! };
//! assert_eq!(options.conflict_strategy, "timestamp");
//! ```

pub mod activity;
pub mod broadcast;
pub mod cache;
mod config;
pub mod conflict;
pub mod connection;
mod context;
mod error;
pub mod health;
pub mod integrity;
pub mod listeners;
pub mod optimistic;
mod orchestrator;
pub mod queue;
pub mod recovery;
pub mod remote;
pub mod retry;
pub mod status;
pub mod validation;
pub mod versions;

pub use activity::ActivityTracker;
pub use broadcast::{BroadcastHub, MessageKind, TabMessage, TabSync};
pub use cache::{CacheEntry, PageCache};
pub use config::{
    BackgroundConfig, BatchConfig, CacheConfig, ConnectionConfig, HealthConfig, OfflineConfig,
    OptimisticConfig, OrchestratorConfig, QueueConfig, RecoveryConfig, RemoteConfig, RetryConfig,
    SyncConfig, ValidationConfig, VersionConfig, DEFAULT_PROBE_URL,
};
pub use conflict::{ConflictResolution, ConflictResolver};
pub use connection::{ConnectionMonitor, ConnectionState, HttpProbe, Probe};
pub use context::{Collaborators, SyncContext};
pub use error::{SyncError, SyncResult};
pub use health::{HealthMonitor, HealthStatus, ServiceHealth, ServiceStatus};
pub use integrity::{IntegrityCheckResult, IntegrityChecker};
pub use listeners::Subscription;
pub use optimistic::{OptimisticUpdate, OptimisticUpdates, UpdateState};
pub use orchestrator::{
    FetchFn, SyncHandle, SyncOptions, SyncOrchestrator, SyncPhase, SyncServices, fetch_fn,
};
pub use queue::{NewRequest, Operation, Priority, RequestQueue};
pub use recovery::{ErrorRecovery, RecoveryContext, RecoveryStrategy};
pub use remote::{RemoteSource, RestRemote};
pub use retry::{RetryManager, RetryPolicy, with_retry};
pub use status::{SyncStatus, SyncStatusTracker};
pub use validation::{DataValidator, ValidationResult};
pub use versions::{VersionTracker, VersionedData};
