//! Error recovery strategies with a bounded attempt budget.
//!
//! Attempts are counted per error signature (`kind` plus message). Once a
//! signature has used up its budget, [`ErrorRecovery::attempt_recovery`]
//! returns `false` without consulting any strategy.

use crate::config::RecoveryConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

/// A remediation callback supplied by the caller.
pub type RecoveryAction = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

/// Callbacks a strategy may use to remediate.
#[derive(Clone, Default)]
pub struct RecoveryContext {
    /// Re-runs the failed operation.
    pub retry: Option<RecoveryAction>,
    /// Drops cached state and fetches again.
    pub refresh: Option<RecoveryAction>,
    /// Renews the session.
    pub refresh_auth: Option<RecoveryAction>,
}

impl RecoveryContext {
    pub fn with_retry(mut self, action: RecoveryAction) -> Self {
        self.retry = Some(action);
        self
    }

    pub fn with_refresh(mut self, action: RecoveryAction) -> Self {
        self.refresh = Some(action);
        self
    }

    pub fn with_refresh_auth(mut self, action: RecoveryAction) -> Self {
        self.refresh_auth = Some(action);
        self
    }
}

/// Remediates one class of error.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Registry name; registering a second strategy under the same name
    /// replaces the first.
    fn name(&self) -> &str;

    fn can_recover(&self, error: &SyncError) -> bool;

    async fn recover(&self, error: &SyncError, context: &RecoveryContext) -> SyncResult<()>;
}

async fn run(action: Option<&RecoveryAction>) -> SyncResult<()> {
    match action {
        Some(action) => action().await,
        None => Ok(()),
    }
}

/// Waits briefly, then retries.
pub struct NetworkRecovery {
    delay: Duration,
}

impl NetworkRecovery {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkRecovery {
    fn name(&self) -> &str {
        "network"
    }

    fn can_recover(&self, error: &SyncError) -> bool {
        error.is_transient() || error.to_string().to_lowercase().contains("network")
    }

    async fn recover(&self, _error: &SyncError, context: &RecoveryContext) -> SyncResult<()> {
        tokio::time::sleep(self.delay).await;
        run(context.retry.as_ref()).await
    }
}

/// Refreshes stale or outdated data.
pub struct StaleDataRecovery;

#[async_trait]
impl RecoveryStrategy for StaleDataRecovery {
    fn name(&self) -> &str {
        "stale-data"
    }

    fn can_recover(&self, error: &SyncError) -> bool {
        if matches!(error, SyncError::Stale(_)) {
            return true;
        }
        let message = error.to_string();
        message.contains("stale") || message.contains("outdated")
    }

    async fn recover(&self, _error: &SyncError, context: &RecoveryContext) -> SyncResult<()> {
        run(context.refresh.as_ref()).await
    }
}

/// Renews the session on authentication failures.
pub struct AuthRecovery;

#[async_trait]
impl RecoveryStrategy for AuthRecovery {
    fn name(&self) -> &str {
        "auth"
    }

    fn can_recover(&self, error: &SyncError) -> bool {
        match error {
            SyncError::Auth(_) => true,
            SyncError::Remote { status, .. } => *status == 401,
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("unauthorized") || message.contains("unauthenticated")
            }
        }
    }

    async fn recover(&self, _error: &SyncError, context: &RecoveryContext) -> SyncResult<()> {
        run(context.refresh_auth.as_ref()).await
    }
}

/// Registry of strategies plus the per-signature attempt counter.
pub struct ErrorRecovery {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    attempts: Mutex<HashMap<String, u32>>,
    max_attempts: u32,
}

impl ErrorRecovery {
    /// Creates a manager with the network, stale-data and auth strategies.
    pub fn new(config: &RecoveryConfig) -> Self {
        let manager = Self::empty(config.max_attempts);
        manager.register_strategy(Arc::new(NetworkRecovery::new(Duration::from_millis(
            config.network_retry_delay_ms,
        ))));
        manager.register_strategy(Arc::new(StaleDataRecovery));
        manager.register_strategy(Arc::new(AuthRecovery));
        manager
    }

    /// Creates a manager without any strategy.
    pub fn empty(max_attempts: u32) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
        }
    }

    /// Adds a strategy at the end of the evaluation order, or replaces the
    /// one registered under the same name in place.
    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let mut strategies = self
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match strategies.iter().position(|s| s.name() == strategy.name()) {
            Some(pos) => strategies[pos] = strategy,
            None => strategies.push(strategy),
        }
    }

    /// Tries every matching strategy in registration order until one
    /// completes. Returns whether one did.
    pub async fn attempt_recovery(&self, error: &SyncError, context: &RecoveryContext) -> bool {
        let signature = error.signature();
        {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            let used = attempts.entry(signature.clone()).or_insert(0);
            if *used >= self.max_attempts {
                warn!("Max recovery attempts reached for error: {signature}");
                return false;
            }
            *used += 1;
        }

        let strategies: Vec<Arc<dyn RecoveryStrategy>> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for strategy in strategies {
            if !strategy.can_recover(error) {
                continue;
            }
            match strategy.recover(error, context).await {
                Ok(()) => {
                    debug!("Recovered from {} with {}", error.kind(), strategy.name());
                    return true;
                }
                Err(e) => error!("Recovery strategy {} failed: {e}", strategy.name()),
            }
        }
        false
    }

    /// Attempts used so far for the signature of `error`.
    pub fn attempts(&self, error: &SyncError) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&error.signature())
            .copied()
            .unwrap_or(0)
    }

    pub fn clear_attempts(&self) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
