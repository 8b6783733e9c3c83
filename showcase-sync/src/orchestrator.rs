//! The sync orchestrator.
//!
//! Binds a logical key to a fetch function and keeps the cached value of
//! that key fresh:
//!
//! 1. `start_sync` is a no-op when the key synced successfully within the
//!    dedupe window
//! 2. the fetched value is validated and integrity-checked; a failure
//!    aborts the cycle and keeps the previously cached value
//! 3. a cached local value is reconciled with the fetched one by the
//!    configured conflict strategy
//! 4. the result is cached, versioned and broadcast to the other tabs
//!
//! Failures never reach the caller. They are recorded in the key's
//! [`SyncStatus`](crate::status::SyncStatus) and handed to error recovery,
//! whose retry/refresh callbacks post commands to the worker task rather
//! than re-entering the sync directly.
//!
//! Revalidation (focus, reconnect, interval, recovery) re-runs the stored
//! fetch and bypasses the dedupe window.
//!
//! A fetch whose binding was stopped or replaced while it ran is
//! discarded: nothing is cached, versioned or broadcast for it.

use crate::activity::ActivityTracker;
use crate::broadcast::{MessageKind, TabMessage, TabSync};
use crate::cache::PageCache;
use crate::config::OrchestratorConfig;
use crate::conflict::ConflictResolver;
use crate::error::{SyncError, SyncResult};
use crate::health::HealthMonitor;
use crate::integrity::IntegrityChecker;
use crate::listeners::Subscription;
use crate::optimistic::OptimisticUpdates;
use crate::recovery::{ErrorRecovery, RecoveryAction, RecoveryContext};
use crate::status::{SyncStatus, SyncStatusTracker};
use crate::validation::DataValidator;
use crate::versions::VersionTracker;
use futures::future::BoxFuture;
use serde_json::Value;
use showcase_types::{Clock, Identity, Timestamp};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Produces the current remote value of a key.
pub type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<Value>> + Send + Sync>;

/// Wraps an async closure as a [`FetchFn`].
pub fn fetch_fn<F, Fut>(f: F) -> FetchFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<Value>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Per-key sync behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
    pub revalidate_on_interval: bool,
    /// Period of interval revalidation.
    pub interval: Duration,
    pub deduping_interval: Duration,
    pub validate_data: bool,
    pub check_integrity: bool,
    pub conflict_strategy: String,
    /// Entity type used for validation and conflict resolution; the key
    /// itself when unset.
    pub entity_type: Option<String>,
    /// Skip fetching while nobody is signed in.
    pub require_auth: bool,
}

impl SyncOptions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
            revalidate_on_interval: false,
            interval: Duration::from_millis(config.sync_interval_ms),
            deduping_interval: Duration::from_millis(config.deduping_interval_ms),
            validate_data: true,
            check_integrity: true,
            conflict_strategy: config.conflict_strategy.clone(),
            entity_type: None,
            require_auth: false,
        }
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// Where a key is in its sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Resolved,
    Failed,
}

impl SyncPhase {
    /// Whether `self -> next` is a legal move.
    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        matches!(
            (self, next),
            (SyncPhase::Idle, SyncPhase::Syncing)
                | (SyncPhase::Syncing, SyncPhase::Resolved | SyncPhase::Failed)
                | (SyncPhase::Resolved | SyncPhase::Failed, SyncPhase::Idle)
        )
    }
}

/// Every manager the orchestrator drives.
#[derive(Clone)]
pub struct SyncServices {
    pub cache: Arc<PageCache>,
    pub tabs: Arc<TabSync>,
    pub validator: Arc<DataValidator>,
    pub integrity: Arc<IntegrityChecker>,
    pub resolver: Arc<ConflictResolver>,
    pub recovery: Arc<ErrorRecovery>,
    pub versions: Arc<VersionTracker>,
    pub status: Arc<SyncStatusTracker>,
    pub health: Arc<HealthMonitor>,
    pub activity: Arc<ActivityTracker>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Revalidate(String),
    RevalidateAll,
    ClearAndRevalidate(String),
}

struct Binding {
    /// Changes whenever the fetch or options are replaced.
    generation: u64,
    fetch: FetchFn,
    options: SyncOptions,
    subscription: Option<Subscription>,
    interval: Option<JoinHandle<()>>,
}

/// Coordinates fetching, checking, reconciling and caching per key.
pub struct SyncOrchestrator {
    services: SyncServices,
    config: OrchestratorConfig,
    bindings: Mutex<HashMap<String, Binding>>,
    generations: AtomicU64,
    phases: Mutex<HashMap<String, SyncPhase>>,
    last_sync: Mutex<HashMap<String, Timestamp>>,
    recovery_attempts: Mutex<HashMap<String, u32>>,
    identity: RwLock<Option<Identity>>,
    refresh_auth: RwLock<Option<RecoveryAction>>,
    commands: mpsc::UnboundedSender<Command>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl SyncOrchestrator {
    pub fn new(services: SyncServices, config: OrchestratorConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        Self {
            services,
            config,
            bindings: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            phases: Mutex::new(HashMap::new()),
            last_sync: Mutex::new(HashMap::new()),
            recovery_attempts: Mutex::new(HashMap::new()),
            identity: RwLock::new(None),
            refresh_auth: RwLock::new(None),
            commands,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn services(&self) -> &SyncServices {
        &self.services
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Binds `key` to `fetch` and syncs it unless it synced within the
    /// dedupe window.
    ///
    /// Calling again for a bound key replaces its fetch function and
    /// options.
    pub async fn start_sync(&self, key: &str, fetch: FetchFn, options: SyncOptions) {
        let dedupe_ms = options.deduping_interval.as_millis() as u64;
        self.bind(key, fetch, options);

        if let Some(last) = self.last_sync(key) {
            let since = self.services.clock.now().saturating_elapsed_since(last);
            if since < dedupe_ms {
                debug!("Skipping sync of {key}, last synced {since}ms ago");
                return;
            }
        }
        self.run(key).await;
    }

    /// Unbinds `key` and forgets its bookkeeping. Unknown keys are ignored.
    pub fn stop_sync(&self, key: &str) {
        let binding = self.bindings().remove(key);
        if let Some(binding) = binding {
            if let Some(subscription) = binding.subscription {
                subscription.unsubscribe();
            }
            if let Some(interval) = binding.interval {
                interval.abort();
            }
            debug!("Stopped syncing {key}");
        }
        lock(&self.last_sync).remove(key);
        lock(&self.recovery_attempts).remove(key);
        lock(&self.phases).remove(key);
    }

    /// Re-runs the sync of `key`, ignoring the dedupe window. Returns
    /// whether the key is bound.
    pub async fn revalidate(&self, key: &str) -> bool {
        if !self.bindings().contains_key(key) {
            return false;
        }
        self.run(key).await;
        true
    }

    /// Revalidates every bound key.
    pub async fn revalidate_all(&self) {
        for key in self.active_keys() {
            self.revalidate(&key).await;
        }
    }

    /// Drops the cached value of `key`, then revalidates it.
    pub async fn clear_and_revalidate(&self, key: &str) {
        self.services.cache.remove(key);
        self.revalidate(key).await;
    }

    /// The tab became visible.
    ///
    /// After a long idle period every cache is cleared, health is checked
    /// and every key revalidates. Otherwise keys opted into focus
    /// revalidation refresh.
    pub async fn on_visible(&self) {
        if self.services.activity.reactivate() {
            info!("Reactivated after idle period, clearing caches");
            self.services.cache.clear();
            let health = self.services.health.check_health().await;
            if !health.healthy {
                warn!("System health issues detected: {}", health.issues.join(", "));
            }
            self.revalidate_all().await;
            return;
        }
        for key in self.keys_where(|o| o.revalidate_on_focus) {
            self.revalidate(&key).await;
        }
    }

    /// Connectivity came back.
    pub async fn on_reconnect(&self) {
        for key in self.keys_where(|o| o.revalidate_on_reconnect) {
            self.revalidate(&key).await;
        }
    }

    /// True when `key` never synced or last synced longer ago than the
    /// staleness threshold.
    pub fn is_stale(&self, key: &str) -> bool {
        match self.last_sync(key) {
            Some(last) => {
                self.services.clock.now().saturating_elapsed_since(last)
                    > self.config.stale_threshold_ms
            }
            None => true,
        }
    }

    /// Time of the last successful sync of `key`.
    pub fn last_sync(&self, key: &str) -> Option<Timestamp> {
        lock(&self.last_sync).get(key).copied()
    }

    pub fn phase(&self, key: &str) -> SyncPhase {
        lock(&self.phases).get(key).copied().unwrap_or_default()
    }

    /// Bound keys, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.bindings().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs the callback auth recovery uses to renew the session.
    pub fn set_auth_refresh(&self, action: RecoveryAction) {
        *self.refresh_auth.write().unwrap_or_else(PoisonError::into_inner) = Some(action);
    }

    /// Queues a revalidation of `key` for the worker task.
    pub fn schedule_revalidate(&self, key: &str) -> SyncResult<()> {
        self.commands
            .send(Command::Revalidate(key.to_string()))
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Queues a revalidation of every key for the worker task.
    pub fn schedule_revalidate_all(&self) -> SyncResult<()> {
        self.commands
            .send(Command::RevalidateAll)
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Starts the task that executes scheduled revalidations.
    ///
    /// Returns `None` if the worker was already started.
    pub fn spawn_worker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut receiver = lock(&self.receiver).take()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                debug!("Handling {command:?}");
                match command {
                    Command::Revalidate(key) => {
                        this.revalidate(&key).await;
                    }
                    Command::RevalidateAll => this.revalidate_all().await,
                    Command::ClearAndRevalidate(key) => this.clear_and_revalidate(&key).await,
                }
            }
        }))
    }

    fn bind(&self, key: &str, fetch: FetchFn, options: SyncOptions) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bindings = self.bindings();
        if let Some(binding) = bindings.get_mut(key) {
            binding.generation = generation;
            binding.fetch = fetch;
            binding.options = options;
            return;
        }
        let subscription = Some(self.subscribe_tabs(key, &options));
        let interval = options
            .revalidate_on_interval
            .then(|| self.spawn_interval(key, options.interval));
        bindings.insert(
            key.to_string(),
            Binding {
                generation,
                fetch,
                options,
                subscription,
                interval,
            },
        );
    }

    /// Applies updates for `key` coming from other tabs.
    fn subscribe_tabs(&self, key: &str, options: &SyncOptions) -> Subscription {
        let cache = Arc::clone(&self.services.cache);
        let validator = Arc::clone(&self.services.validator);
        let integrity = Arc::clone(&self.services.integrity);
        let commands = self.commands.clone();
        let owned_key = key.to_string();
        let entity = options
            .entity_type
            .clone()
            .unwrap_or_else(|| key.to_string());
        let validate = options.validate_data;
        let check = options.check_integrity;

        self.services.tabs.subscribe(key, move |message: &TabMessage| {
            let data = match (&message.kind, &message.data) {
                (MessageKind::DataUpdate, Some(data)) => data,
                _ => {
                    cache.remove(&owned_key);
                    let _ = commands.send(Command::Revalidate(owned_key.clone()));
                    return;
                }
            };
            if validate {
                let result = validator.validate_data(&entity, data);
                if !result.valid {
                    warn!(
                        "Rejected cross-tab update for {owned_key}: {}",
                        result.errors.join(", ")
                    );
                    return;
                }
            }
            if check {
                let result = integrity.check_integrity(&entity, data);
                if !result.valid {
                    warn!(
                        "Rejected cross-tab update for {owned_key}: {}",
                        result.errors.join(", ")
                    );
                    return;
                }
            }
            cache.set_value(&owned_key, data.clone());
        })
    }

    fn spawn_interval(&self, key: &str, period: Duration) -> JoinHandle<()> {
        let commands = self.commands.clone();
        let key = key.to_string();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if commands.send(Command::Revalidate(key.clone())).is_err() {
                    break;
                }
            }
        })
    }

    async fn run(&self, key: &str) {
        loop {
            let bound = self
                .bindings()
                .get(key)
                .map(|b| (b.generation, Arc::clone(&b.fetch), b.options.clone()));
            let Some((generation, fetch, options)) = bound else {
                return;
            };

            if options.require_auth && self.identity().is_none() {
                debug!("Not syncing {key}: nobody signed in");
                self.services.status.fail(key, "Authentication required");
                return;
            }
            if !self.enter_syncing(key) {
                debug!("Sync of {key} already in progress");
                return;
            }

            self.services.status.start(key);
            let result = self.sync_once(key, generation, &fetch, &options).await;
            if !self.is_current(key, generation) {
                debug!("Discarding superseded sync of {key}");
                if self.settle_superseded(key) {
                    continue;
                }
                return;
            }
            match result {
                Ok(()) => {
                    self.set_phase(key, SyncPhase::Resolved);
                    debug!("Synced {key}");
                }
                Err(e) => {
                    error!("Sync failed for {key}: {e}");
                    self.services.status.fail(key, e.to_string());
                    self.set_phase(key, SyncPhase::Failed);
                    self.recover(key, &e).await;
                    self.set_phase(key, SyncPhase::Idle);
                }
            }
            return;
        }
    }

    async fn sync_once(
        &self,
        key: &str,
        generation: u64,
        fetch: &FetchFn,
        options: &SyncOptions,
    ) -> SyncResult<()> {
        let services = &self.services;
        let remote = fetch().await?;
        if !self.is_current(key, generation) {
            return Ok(());
        }
        let entity = options.entity_type.as_deref().unwrap_or(key);

        if options.validate_data {
            let result = services.validator.validate_data(entity, &remote);
            if !result.valid {
                return Err(SyncError::Validation(result.errors));
            }
        }
        if options.check_integrity {
            let result = services.integrity.check_integrity(entity, &remote);
            if !result.valid {
                return Err(SyncError::Integrity(result.errors));
            }
            if !result.warnings.is_empty() {
                debug!("Integrity warnings for {key}: {}", result.warnings.join(", "));
            }
        }

        let resolved = match services.cache.get_value(key) {
            Some(local) if local != remote => {
                services
                    .resolver
                    .resolve_conflict(entity, &local, &remote, &options.conflict_strategy)?
                    .resolved
            }
            _ => remote,
        };

        services.cache.set_value(key, resolved.clone());
        services.versions.track(key, resolved.clone());
        services
            .tabs
            .broadcast(MessageKind::DataUpdate, Some(key), Some(resolved));

        lock(&self.last_sync).insert(key.to_string(), services.clock.now());
        lock(&self.recovery_attempts).remove(key);
        services.status.complete(key);
        Ok(())
    }

    /// Whether `key` is still bound with the binding a sync started from.
    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.bindings()
            .get(key)
            .is_some_and(|b| b.generation == generation)
    }

    /// Resets the bookkeeping a discarded sync left behind. Returns whether
    /// the key is still bound and should sync again.
    fn settle_superseded(&self, key: &str) -> bool {
        if self.bindings().contains_key(key) {
            lock(&self.phases).insert(key.to_string(), SyncPhase::Idle);
            return true;
        }
        lock(&self.phases).remove(key);
        self.services.status.clear(key);
        false
    }

    async fn recover(&self, key: &str, error: &SyncError) {
        {
            let mut attempts = lock(&self.recovery_attempts);
            let used = attempts.entry(key.to_string()).or_insert(0);
            if *used >= self.config.max_recovery_attempts {
                error!("Max recovery attempts reached for {key}");
                return;
            }
            *used += 1;
        }

        let mut context = RecoveryContext::default()
            .with_retry(self.command_action(Command::Revalidate(key.to_string())))
            .with_refresh(self.command_action(Command::ClearAndRevalidate(key.to_string())));
        let refresh_auth = self
            .refresh_auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(action) = refresh_auth {
            context = context.with_refresh_auth(action);
        }

        if self.services.recovery.attempt_recovery(error, &context).await {
            debug!("Recovery scheduled for {key}");
        }
    }

    fn command_action(&self, command: Command) -> RecoveryAction {
        let commands = self.commands.clone();
        Arc::new(move || {
            let sent = commands
                .send(command.clone())
                .map_err(|_| SyncError::ChannelClosed);
            Box::pin(async move { sent })
        })
    }

    fn enter_syncing(&self, key: &str) -> bool {
        let mut phases = lock(&self.phases);
        let phase = phases.entry(key.to_string()).or_default();
        if *phase == SyncPhase::Syncing {
            return false;
        }
        // Resolved and Failed settle to Idle implicitly.
        *phase = SyncPhase::Syncing;
        true
    }

    fn set_phase(&self, key: &str, next: SyncPhase) {
        let mut phases = lock(&self.phases);
        let phase = phases.entry(key.to_string()).or_default();
        if !phase.can_transition_to(next) {
            warn!("Unexpected phase change for {key}: {phase:?} -> {next:?}");
        }
        *phase = next;
    }

    fn keys_where(&self, predicate: impl Fn(&SyncOptions) -> bool) -> Vec<String> {
        let mut keys: Vec<String> = self
            .bindings()
            .iter()
            .filter(|(_, b)| predicate(&b.options))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        lock(&self.bindings)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a UI consumer holds for one synced key.
#[derive(Clone)]
pub struct SyncHandle {
    key: String,
    orchestrator: Arc<SyncOrchestrator>,
    optimistic: Arc<OptimisticUpdates>,
    overlay: Arc<Mutex<Option<Value>>>,
}

impl SyncHandle {
    pub fn new(
        key: impl Into<String>,
        orchestrator: Arc<SyncOrchestrator>,
        optimistic: Arc<OptimisticUpdates>,
    ) -> Self {
        Self {
            key: key.into(),
            orchestrator,
            optimistic,
            overlay: Arc::new(Mutex::new(None)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The speculative value while an optimistic update is in flight,
    /// otherwise the cached value.
    pub fn data(&self) -> Option<Value> {
        if let Some(value) = lock(&self.overlay).clone() {
            return Some(value);
        }
        self.orchestrator.services.cache.get_value(&self.key)
    }

    pub fn status(&self) -> SyncStatus {
        self.orchestrator.services.status.get(&self.key)
    }

    pub fn loading(&self) -> bool {
        self.status().in_progress
    }

    pub fn error(&self) -> Option<String> {
        self.status().error
    }

    /// Revalidates the key now.
    pub async fn refresh(&self) {
        self.orchestrator.revalidate(&self.key).await;
    }

    /// Shows `value` until `commit` settles.
    ///
    /// On success the confirmed value replaces the cached one. On failure
    /// the previous value is shown again and the error is recorded in the
    /// key's status.
    pub async fn optimistic_update<F>(&self, value: Value, commit: F) -> SyncResult<Value>
    where
        F: Future<Output = SyncResult<Value>>,
    {
        let rollback = self.data().unwrap_or(Value::Null);
        let id = self.optimistic.track(&self.key, value.clone(), rollback);
        *lock(&self.overlay) = Some(value);

        let result = commit.await;
        *lock(&self.overlay) = None;

        let services = &self.orchestrator.services;
        match result {
            Ok(confirmed) => {
                self.optimistic.succeed(id)?;
                services.cache.set_value(&self.key, confirmed.clone());
                services.versions.track(&self.key, confirmed.clone());
                services.tabs.broadcast(
                    MessageKind::DataUpdate,
                    Some(&self.key),
                    Some(confirmed.clone()),
                );
                Ok(confirmed)
            }
            Err(e) => {
                if let Err(settle) = self.optimistic.fail(id, e.to_string()) {
                    warn!("Failed to roll back optimistic update {id}: {settle}");
                }
                services.status.fail(&self.key, e.to_string());
                Err(e)
            }
        }
    }
}
