//! Retry decorator for catalog clients.

use std::time::Duration;

use ceres_core::config::HttpConfig;
use ceres_core::error::AppError;
use ceres_core::traits::{CatalogClient, PageResult};
use tokio::time::sleep;

/// Exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for BackoffPolicy {
    fn from(http: &HttpConfig) -> Self {
        Self {
            max_retries: http.max_retries,
            base_delay: http.retry_base_delay,
            max_delay: http.retry_max_delay,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Wraps a [`CatalogClient`] and retries transient failures.
///
/// Only errors for which [`AppError::is_retryable`] holds are retried; the
/// last error is returned once the policy is exhausted.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: BackoffPolicy,
}

impl<C: CatalogClient> RetryingClient<C> {
    pub fn new(inner: C, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }
}

impl<C: CatalogClient> CatalogClient for RetryingClient<C> {
    async fn fetch_page(&self, offset: u64, page_size: u32) -> Result<PageResult, AppError> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch_page(offset, page_size).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        offset,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Catalog request failed, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
