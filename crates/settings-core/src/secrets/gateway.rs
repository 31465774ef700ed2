//! Timeout and retry around a backend
//!
//! Every attempt is bounded by [`RetryPolicy::timeout`]. Transient failures
//! (timeouts, transport errors, throttling, 5xx, `UNAVAILABLE`) are retried
//! up to `max_retries` times with exponential backoff; not-found and
//! authentication failures are returned immediately.

use super::cloud::Backend;
use super::{BackendKind, SecretClient, SecretsError, SecretsSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry and timeout settings for secret fetches
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Timeout for a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delays slept before each retry, in order
    pub fn backoff_schedule(&self) -> Vec<u64> {
        let mut delays = Vec::with_capacity(self.max_retries as usize);
        let mut backoff_ms = self.initial_backoff_ms.min(self.max_backoff_ms);
        for _ in 0..self.max_retries {
            delays.push(backoff_ms);
            backoff_ms = next_backoff(backoff_ms, self);
        }
        delays
    }
}

fn next_backoff(backoff_ms: u64, policy: &RetryPolicy) -> u64 {
    let next = (backoff_ms as f64 * policy.backoff_multiplier) as u64;
    next.min(policy.max_backoff_ms)
}

/// Single entry point for remote secret fetches
///
/// Cloning is cheap; the backend is shared.
#[derive(Debug, Clone)]
pub struct SecretsGateway {
    backend: Arc<Backend>,
    policy: RetryPolicy,
}

impl SecretsGateway {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
            policy: RetryPolicy::default(),
        }
    }

    /// Build the gateway described by `settings` around an SDK client
    pub fn from_settings(
        settings: &SecretsSettings,
        client: Arc<dyn SecretClient>,
    ) -> Result<Self, SecretsError> {
        let backend = Backend::from_settings(settings, client)?;
        Ok(Self::new(backend).with_policy(settings.retry_policy()))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch the secret stored at `location`
    pub async fn fetch(&self, location: &str) -> Result<Vec<u8>, SecretsError> {
        let mut last_error = None;
        let mut backoff_ms = self.policy.initial_backoff_ms.min(self.policy.max_backoff_ms);

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                debug!(
                    attempt = attempt,
                    backoff_ms = backoff_ms,
                    backend = %self.backend.kind(),
                    location = %location,
                    "Retrying secret fetch"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = next_backoff(backoff_ms, &self.policy);
            }

            match self.attempt(location).await {
                Ok(bytes) => {
                    debug!(
                        backend = %self.backend.kind(),
                        location = %location,
                        attempts = attempt + 1,
                        "Fetched secret"
                    );
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        error = %e,
                        backend = %self.backend.kind(),
                        location = %location,
                        "Secret fetch failed"
                    );
                    let transient = e.is_transient();
                    last_error = Some(e);
                    if !transient {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SecretsError::backend("no fetch attempt was made", false)))
    }

    async fn attempt(&self, location: &str) -> Result<Vec<u8>, SecretsError> {
        match tokio::time::timeout(self.policy.timeout, self.backend.fetch_once(location)).await {
            Ok(result) => result,
            Err(_) => Err(SecretsError::Timeout(self.policy.timeout)),
        }
    }
}
