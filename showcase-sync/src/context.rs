//! The application root.
//!
//! [`SyncContext`] owns one instance of every manager, built from a
//! [`SyncConfig`] and the host-provided [`Collaborators`]. The host forwards
//! its events (online/offline, visibility, user activity, sign-in) here and
//! UI consumers register keys through [`SyncContext::register_sync`].

use crate::activity::ActivityTracker;
use crate::broadcast::{BroadcastHub, MessageKind, TabMessage, TabSync};
use crate::cache::PageCache;
use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::connection::{ConnectionMonitor, ConnectionState, Probe};
use crate::error::SyncResult;
use crate::health::{HealthMonitor, HealthStatus};
use crate::integrity::IntegrityChecker;
use crate::listeners::Subscription;
use crate::optimistic::OptimisticUpdates;
use crate::orchestrator::{FetchFn, SyncHandle, SyncOptions, SyncOrchestrator, SyncServices};
use crate::queue::{
    BackgroundSync, BatchProcessor, NewRequest, OfflineLog, RequestProcessor, RequestQueue,
    TaskHandler,
};
use crate::recovery::ErrorRecovery;
use crate::remote::RemoteSource;
use crate::retry::RetryManager;
use crate::status::SyncStatusTracker;
use crate::validation::DataValidator;
use crate::versions::VersionTracker;
use futures::StreamExt;
use showcase_storage::KvStore;
use showcase_types::{Clock, EntityKind, Identity, RequestId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the host provides.
#[derive(Clone)]
pub struct Collaborators {
    /// Per-tab store: page cache entries, health probes.
    pub session_store: Arc<dyn KvStore>,
    /// Survives restarts: request queue, background tasks, offline log,
    /// version histories.
    pub durable_store: Arc<dyn KvStore>,
    /// Shared by every tab of the same origin.
    pub hub: BroadcastHub,
    pub probe: Arc<dyn Probe>,
    pub processor: Arc<dyn RequestProcessor>,
    pub task_handler: Arc<dyn TaskHandler>,
    pub clock: Arc<dyn Clock>,
}

/// One tab's sync layer.
pub struct SyncContext {
    config: SyncConfig,
    orchestrator: Arc<SyncOrchestrator>,
    connection: Arc<ConnectionMonitor>,
    queue: Arc<RequestQueue>,
    background: Arc<BackgroundSync>,
    offline: Arc<OfflineLog>,
    batch: BatchProcessor,
    retry: Arc<RetryManager>,
    optimistic: Arc<OptimisticUpdates>,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    pub fn new(config: SyncConfig, collab: Collaborators) -> Arc<Self> {
        let clock = Arc::clone(&collab.clock);

        let cache = Arc::new(PageCache::new(
            Arc::clone(&collab.session_store),
            Arc::clone(&clock),
            config.cache.clone(),
        ));
        let tabs = Arc::new(TabSync::new(collab.hub.clone(), Arc::clone(&clock)));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&collab.durable_store),
            Arc::clone(&collab.session_store),
            Arc::clone(&collab.probe),
            Arc::clone(&clock),
            config.health.clone(),
        ));
        let services = SyncServices {
            cache,
            tabs,
            validator: Arc::new(DataValidator::new(
                Arc::clone(&clock),
                config.validation.clone(),
            )),
            integrity: Arc::new(IntegrityChecker::new(Arc::clone(&clock))),
            resolver: Arc::new(ConflictResolver::new()),
            recovery: Arc::new(ErrorRecovery::new(&config.recovery)),
            versions: Arc::new(VersionTracker::persistent(
                Arc::clone(&collab.durable_store),
                Arc::clone(&clock),
                config.versions.clone(),
            )),
            status: Arc::new(SyncStatusTracker::new(Arc::clone(&clock))),
            health,
            activity: Arc::new(ActivityTracker::new(
                Arc::clone(&clock),
                Duration::from_millis(config.orchestrator.idle_timeout_ms),
            )),
            clock: Arc::clone(&clock),
        };

        let connection = Arc::new(ConnectionMonitor::new(
            Arc::clone(&collab.probe),
            Arc::clone(&clock),
            config.connection.clone(),
        ));
        let queue = Arc::new(RequestQueue::new(
            Arc::clone(&collab.durable_store),
            Arc::clone(&collab.processor),
            Arc::clone(&clock),
            config.queue.clone(),
        ));
        let background = Arc::new(BackgroundSync::new(
            Arc::clone(&collab.durable_store),
            Arc::clone(&collab.task_handler),
            Arc::clone(&clock),
            config.background.clone(),
        ));
        let offline = Arc::new(OfflineLog::new(
            Arc::clone(&collab.durable_store),
            Arc::clone(&collab.task_handler),
            Arc::clone(&clock),
            config.offline.clone(),
        ));

        let context = Self {
            orchestrator: Arc::new(SyncOrchestrator::new(
                services,
                config.orchestrator.clone(),
            )),
            connection,
            queue,
            background,
            offline,
            batch: BatchProcessor::new(config.batch),
            retry: Arc::new(RetryManager::new(config.retry.clone())),
            optimistic: Arc::new(OptimisticUpdates::new(clock, config.optimistic.clone())),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            config,
        };
        Arc::new(context)
    }

    /// Binds `key` to `fetch` and returns the consumer's handle.
    pub async fn register_sync(
        &self,
        key: &str,
        fetch: FetchFn,
        options: SyncOptions,
    ) -> SyncHandle {
        self.orchestrator.start_sync(key, fetch, options).await;
        SyncHandle::new(key, Arc::clone(&self.orchestrator), Arc::clone(&self.optimistic))
    }

    /// Stops syncing `key`.
    pub fn unregister_sync(&self, key: &str) {
        self.orchestrator.stop_sync(key);
    }

    /// Queues a mutation; it is sent right away when online.
    pub async fn enqueue_mutation(&self, request: NewRequest) -> RequestId {
        self.queue.enqueue(request).await
    }

    pub fn is_stale(&self, key: &str) -> bool {
        self.orchestrator.is_stale(key)
    }

    pub fn get_health(&self) -> HealthStatus {
        self.orchestrator.services().health.status()
    }

    pub fn get_connection(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Records an online/offline event from the host.
    ///
    /// Going online drains the request queue, runs background tasks,
    /// replays the offline log and revalidates reconnect-enabled keys.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.connection.set_online(online);
        self.apply_online(online);
        if online {
            if !was_online {
                info!("Connection restored");
            }
            self.drain().await;
        } else if was_online {
            info!("Connection lost, deferring mutations");
        }
    }

    /// The tab became visible.
    pub async fn on_visible(&self) {
        let state = self.connection.check_connection().await;
        self.apply_online(state.online);
        if state.online {
            self.background.process().await;
        }
        self.orchestrator.on_visible().await;
    }

    /// The user interacted with the page.
    pub fn record_activity(&self) {
        self.orchestrator.services().activity.record_activity();
    }

    /// Signs a user in or out and tells the other tabs.
    pub fn set_identity(&self, identity: Option<Identity>) {
        let data = identity
            .as_ref()
            .and_then(|i| serde_json::to_value(i).ok());
        self.orchestrator.set_identity(identity);
        self.orchestrator
            .services()
            .tabs
            .broadcast(MessageKind::AuthStateChange, None, data);
    }

    pub fn identity(&self) -> Option<Identity> {
        self.orchestrator.identity()
    }

    /// Starts the periodic machinery. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Some(worker) = self.orchestrator.spawn_worker() else {
            debug!("Sync context already started");
            return;
        };
        let services = self.orchestrator.services().clone();
        let mut tasks = vec![
            worker,
            Arc::clone(&services.cache).spawn_sweeper(),
            Arc::clone(&self.connection).spawn_periodic(),
            Arc::clone(&services.health).spawn_periodic(),
            Arc::clone(&services.validator).spawn_sweep(Arc::clone(&services.cache)),
            Arc::clone(&self.background).spawn_periodic(),
            Arc::clone(&services.tabs).spawn_listener(),
        ];
        tasks.push(self.spawn_reconnect_watcher());
        self.track_auth_changes();
        self.tasks().extend(tasks);
        info!("Sync context started");
    }

    /// Stops every task started by [`SyncContext::start`] or
    /// [`SyncContext::watch_remote`].
    pub fn shutdown(&self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        info!("Sync context stopped");
    }

    /// Revalidates `key` whenever the backend reports a change to `kind`.
    pub async fn watch_remote(
        &self,
        remote: Arc<dyn RemoteSource>,
        kind: EntityKind,
        key: &str,
    ) -> SyncResult<()> {
        let mut changes = remote.subscribe_to_changes(kind, None).await?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let key = key.to_string();
        let task = tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                debug!(
                    "{:?} on {} ({:?}), revalidating {key}",
                    event.change, event.entity, event.id
                );
                if orchestrator.schedule_revalidate(&key).is_err() {
                    break;
                }
            }
        });
        self.tasks().push(task);
        Ok(())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.orchestrator.services().cache
    }

    pub fn tabs(&self) -> &Arc<TabSync> {
        &self.orchestrator.services().tabs
    }

    pub fn validator(&self) -> &Arc<DataValidator> {
        &self.orchestrator.services().validator
    }

    pub fn integrity(&self) -> &Arc<IntegrityChecker> {
        &self.orchestrator.services().integrity
    }

    pub fn resolver(&self) -> &Arc<ConflictResolver> {
        &self.orchestrator.services().resolver
    }

    pub fn recovery(&self) -> &Arc<ErrorRecovery> {
        &self.orchestrator.services().recovery
    }

    pub fn versions(&self) -> &Arc<VersionTracker> {
        &self.orchestrator.services().versions
    }

    pub fn status(&self) -> &Arc<SyncStatusTracker> {
        &self.orchestrator.services().status
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.orchestrator.services().health
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.orchestrator.services().activity
    }

    pub fn connection(&self) -> &Arc<ConnectionMonitor> {
        &self.connection
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn background(&self) -> &Arc<BackgroundSync> {
        &self.background
    }

    pub fn offline(&self) -> &Arc<OfflineLog> {
        &self.offline
    }

    pub fn batch(&self) -> &BatchProcessor {
        &self.batch
    }

    pub fn retry(&self) -> &Arc<RetryManager> {
        &self.retry
    }

    pub fn optimistic(&self) -> &Arc<OptimisticUpdates> {
        &self.optimistic
    }

    fn apply_online(&self, online: bool) {
        self.queue.set_online(online);
        self.background.set_online(online);
        self.offline.set_online(online);
    }

    async fn drain(&self) {
        let drained = self.queue.process().await;
        if drained.processed > 0 || drained.failed.is_some() {
            debug!(
                "Request queue drained: {} sent, {} left",
                drained.processed, drained.remaining
            );
        }
        self.background.process().await;
        self.offline.replay().await;
        self.orchestrator.on_reconnect().await;
    }

    /// Probe-detected reconnects run the same drain as host events.
    fn spawn_reconnect_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let last = Mutex::new(self.connection.is_online());
        let subscription = self.connection.subscribe(move |state: &ConnectionState| {
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last != state.online {
                *last = state.online;
                let _ = tx.send(state.online);
            }
        });
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);

        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(online) = rx.recv().await {
                let Some(context) = this.upgrade() else {
                    break;
                };
                context.apply_online(online);
                if online {
                    info!("Connectivity probe succeeded again");
                    context.drain().await;
                } else {
                    warn!("Connectivity probe failed, going offline");
                }
            }
        })
    }

    /// Sign-in and sign-out in other tabs apply here too.
    fn track_auth_changes(self: &Arc<Self>) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let subscription = self
            .orchestrator
            .services()
            .tabs
            .subscribe_auth(move |message: &TabMessage| {
                let identity = message
                    .data
                    .as_ref()
                    .and_then(|d| serde_json::from_value::<Identity>(d.clone()).ok());
                debug!("Auth state changed in tab {}", message.origin);
                orchestrator.set_identity(identity);
                let _ = orchestrator.schedule_revalidate_all();
            });
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
