//! Retry controller
//!
//! Wraps a [`PageFetcher`] with bounded retries. Every attempt first takes a slot from
//! the shared [`RateLimiter`], so retries count against the same request budget as
//! first attempts.

use super::client::PageFetcher;
use super::rate_limit::RateLimiter;
use crate::decode::PageResult;
use crate::error::FetchError;
use crate::types::BackoffType;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and backoff settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per page, first attempt included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for computed delays
    pub max_backoff: Duration,
    /// Growth of the delay between retries
    pub backoff_type: BackoffType,
    /// Upper bound for server-provided `Retry-After` hints
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_type: BackoffType::Exponential,
            max_retry_after: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Create the default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set backoff configuration
    #[must_use]
    pub fn with_backoff(mut self, backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        self.backoff_type = backoff_type;
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set the cap for `Retry-After` hints
    #[must_use]
    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    /// Backoff before retry number `retry` (0 for the first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = match self.backoff_type {
            BackoffType::Constant => self.initial_backoff,
            BackoffType::Linear => self.initial_backoff.saturating_mul(retry.saturating_add(1)),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(retry);
                self.initial_backoff.saturating_mul(factor)
            }
        };

        std::cmp::min(delay, self.max_backoff)
    }

    /// Delay before retrying after `error`: the server hint when present, else backoff
    pub fn delay_for(&self, error: &FetchError, retry: u32) -> Duration {
        match error.retry_after() {
            Some(hint) => std::cmp::min(hint, self.max_retry_after),
            None => self.backoff(retry),
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Bounded-retry wrapper around a page fetcher
#[derive(Clone)]
pub struct RetryController {
    fetcher: Arc<dyn PageFetcher>,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl RetryController {
    /// Wrap `fetcher`, pacing every attempt through `limiter`
    pub fn new(fetcher: Arc<dyn PageFetcher>, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            limiter,
            policy,
        }
    }

    /// Fetch one logical page, retrying transient failures.
    ///
    /// Fatal failures return immediately. Exhausting the attempt budget returns
    /// [`FetchError::RetriesExhausted`] wrapping the last transient cause.
    pub async fn fetch(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> Result<PageResult, FetchError> {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await;

            let error = match self.fetcher.fetch_page(collection_id, cursor).await {
                Ok(page) => {
                    if attempt > 1 {
                        debug!(collection_id, attempt, "Page fetched after retry");
                    }
                    return Ok(page);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(
                    collection_id,
                    cursor,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(&error, attempt - 1);
            warn!(
                collection_id,
                cursor,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl PageFetcher for RetryController {
    async fn fetch_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> Result<PageResult, FetchError> {
        self.fetch(collection_id, cursor).await
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("limiter", &self.limiter)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
