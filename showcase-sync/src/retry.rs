//! Retries with exponential backoff.
//!
//! [`with_retry`] is the plain helper for one-off operations.
//! [`RetryManager`] additionally races every attempt against a timeout,
//! caps the backoff and keeps a per-key attempt counter.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Policy for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts failed.
///
/// Waits `delay_ms * backoff_factor^n` after the n-th failure, except after
/// the last one.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.delay_ms as f64;
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("Attempt {attempt}/{attempts} failed: {e}");
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            delay *= policy.backoff_factor;
        }
    }
    Err(SyncError::RetryExhausted {
        attempts,
        last_error,
    })
}

/// Keyed retries with per-attempt timeouts and capped backoff.
pub struct RetryManager {
    config: RetryConfig,
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Backoff before attempt `attempt + 1`: `initial * factor^attempt`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.config.initial_delay_ms as f64
            * self.config.backoff_factor.powi(attempt as i32);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Runs `op` under `key` until it succeeds or the attempts run out.
    ///
    /// A success clears the key's counter.
    pub async fn execute<T, F, Fut>(&self, key: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut last_error = String::new();
        loop {
            let attempt = self.attempts(key);
            if attempt >= self.config.max_attempts {
                warn!("Giving up on {key} after {attempt} attempts");
                self.clear_retries(key);
                return Err(SyncError::RetryExhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };
            match result {
                Ok(value) => {
                    self.clear_retries(key);
                    return Ok(value);
                }
                Err(e) => {
                    debug!("Attempt {} for {key} failed: {e}", attempt + 1);
                    last_error = e.to_string();
                    self.attempts
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key.to_string(), attempt + 1);
                    if attempt + 1 < self.config.max_attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }
    }

    /// Failed attempts recorded for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn clear_retries(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
