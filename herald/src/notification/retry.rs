//! Retry policies and the retrying strategy decorator.
//!
//! [`RetryingStrategy`] wraps any [`DeliveryStrategy`] and re-invokes it on
//! transient failure, sleeping between attempts as the [`RetryPolicy`] says.
//! The backoff sleep holds the worker for its whole duration and can be
//! interrupted through the dispatch's cancellation token, which the dispatcher
//! installs with [`with_cancellation`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::channels::DeliveryStrategy;
use super::domain::{Notification, NotificationKind};
use crate::error::DeliveryError;
use crate::{Error, Result};

/// Maps attempt numbers to backoff delays.
///
/// Implementations are pure: the same attempt always yields the same delay.
pub trait RetryPolicy: Send + Sync {
    /// Delay to wait after failed attempt `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration;

    /// Total attempts allowed, including the first. Always at least 1.
    fn max_attempts(&self) -> u32;
}

/// `delay(attempt) = initial_delay * 2^(attempt - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    initial_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::config("retry max_attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
        })
    }

    /// Delay after the first failed attempt.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }
}

impl Default for ExponentialBackoff {
    /// Three attempts starting at 100 ms.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // Cap the exponent so the multiplier fits in u32; the product saturates.
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(1u32 << exponent)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

tokio::task_local! {
    static CANCELLATION: CancellationToken;
}

/// Run `fut` with `token` as the cancellation signal for any retry backoff
/// inside it.
pub async fn with_cancellation<F: Future>(token: CancellationToken, fut: F) -> F::Output {
    CANCELLATION.scope(token, fut).await
}

fn current_cancellation() -> Option<CancellationToken> {
    CANCELLATION.try_with(|token| token.clone()).ok()
}

/// Strategy decorator adding bounded retries with backoff.
pub struct RetryingStrategy<S, P> {
    inner: S,
    policy: P,
    name: String,
}

impl<S: DeliveryStrategy, P: RetryPolicy> RetryingStrategy<S, P> {
    pub fn new(inner: S, policy: P) -> Self {
        let name = format!("{} (with retry)", inner.name());
        Self {
            inner,
            policy,
            name,
        }
    }

    /// The wrapped strategy.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

/// Sleep for `delay`, returning `false` if the surrounding dispatch was
/// cancelled first.
async fn backoff(delay: Duration) -> bool {
    match current_cancellation() {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = sleep(delay) => true,
            }
        }
        None => {
            sleep(delay).await;
            true
        }
    }
}

#[async_trait]
impl<S, P> DeliveryStrategy for RetryingStrategy<S, P>
where
    S: DeliveryStrategy,
    P: RetryPolicy,
{
    fn matches(&self, kind: NotificationKind) -> bool {
        self.inner.matches(kind)
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), DeliveryError> {
        let max_attempts = self.policy.max_attempts().max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.inner.send(notification).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            notification_id = %notification.id(),
                            provider = %self.inner.name(),
                            attempt,
                            "Delivery succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                error!(
                    notification_id = %notification.id(),
                    provider = %self.inner.name(),
                    "Exhausted {} attempts: {}",
                    max_attempts,
                    err
                );
                return Err(DeliveryError::retries_exhausted(&self.name, attempt, err));
            }

            let delay = self.policy.delay(attempt);
            warn!(
                notification_id = %notification.id(),
                provider = %self.inner.name(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Attempt failed, retrying: {}",
                err
            );

            if !backoff(delay).await {
                warn!(
                    notification_id = %notification.id(),
                    provider = %self.inner.name(),
                    attempt,
                    "Retry backoff interrupted by cancellation"
                );
                return Err(DeliveryError::cancelled(&self.name, attempt));
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
