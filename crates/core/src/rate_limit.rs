//! Shared request scheduling: a token-bucket rate limiter plus retry with
//! exponential backoff.
//!
//! Every outbound API call of a run goes through one [`RequestScheduler`], so
//! readers, push stages, retries and asset polls all draw from the same
//! `rate_limit` per `rate_limit_period` budget.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use tracing::{debug, warn};

use crate::errors::{ApiError, ConfigError};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry behaviour for retryable API errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before attempt number `attempt` (0-indexed; attempt 0 has none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        if self.jitter && capped > 0.0 {
            let factor: f64 = rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(capped * (1.0 + factor))
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Rate limiter and retry policy shared by every call of a run.
#[derive(Clone)]
pub struct RequestScheduler {
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
}

impl RequestScheduler {
    /// `rate_limit` requests per `period`, with bursts of up to `rate_limit`.
    pub fn new(rate_limit: u32, period: Duration, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let burst = NonZeroU32::new(rate_limit).ok_or_else(|| ConfigError::InvalidValue {
            field: "api.rate_limit".into(),
            detail: "rate limit must be > 0".into(),
        })?;
        let quota = Quota::with_period(period / rate_limit)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "api.rate_limit_period_ms".into(),
                detail: "rate limit period must be > 0".into(),
            })?
            .allow_burst(burst);
        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            retry,
        })
    }

    /// Wait for one request slot.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Run `op` under the rate limiter, retrying retryable errors.
    ///
    /// `op` receives the attempt number (0 for the first attempt). The last
    /// error is returned once the attempts are exhausted or a non-retryable
    /// error occurs.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            self.acquire().await;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.retry.delay_for_attempt(attempt));
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable API error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(label, attempt, error = %e, "API call failed");
                    return Err(e);
                }
            }
        }
    }
}
