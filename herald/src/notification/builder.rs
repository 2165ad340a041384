//! Fluent wiring for [`Dispatcher`].

use std::sync::Arc;

use super::channels::DeliveryStrategy;
use super::dispatcher::Dispatcher;
use super::events::NotificationListener;
use super::retry::{ExponentialBackoff, RetryPolicy, RetryingStrategy};
use super::validation::{EmailValidator, NotificationValidator, SmsValidator};
use crate::Result;
use crate::config::DispatcherConfig;

/// Collects registrations and builds a [`Dispatcher`].
///
/// Registration order is preserved: the first strategy matching a kind wins,
/// and listeners are notified in the order they were added.
pub struct DispatcherBuilder {
    strategies: Vec<Arc<dyn DeliveryStrategy>>,
    validators: Vec<Arc<dyn NotificationValidator>>,
    listeners: Vec<Arc<dyn NotificationListener>>,
    pool_size: usize,
    retry: Option<ExponentialBackoff>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            validators: Vec::new(),
            listeners: Vec::new(),
            pool_size: DispatcherConfig::default().pool_size,
            retry: None,
        }
    }

    /// Start from a validated configuration: pool size plus the retry policy
    /// used by [`with_configured_retry`](Self::with_configured_retry).
    pub fn from_config(config: &DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool_size: config.pool_size,
            retry: Some(config.retry.policy()?),
            ..Self::new()
        })
    }

    pub fn with_strategy(mut self, strategy: impl DeliveryStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Register `strategy` wrapped in a retry decorator driven by `policy`.
    pub fn with_resilient_strategy<S, P>(self, strategy: S, policy: P) -> Self
    where
        S: DeliveryStrategy + 'static,
        P: RetryPolicy + 'static,
    {
        self.with_strategy(RetryingStrategy::new(strategy, policy))
    }

    /// Register `strategy` with the retry policy from [`from_config`](Self::from_config),
    /// or the default policy when the builder was not created from one.
    pub fn with_configured_retry(self, strategy: impl DeliveryStrategy + 'static) -> Self {
        let policy = self.retry.unwrap_or_default();
        self.with_resilient_strategy(strategy, policy)
    }

    pub fn with_validator(mut self, validator: impl NotificationValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Email and SMS format validators.
    pub fn with_default_validators(self) -> Self {
        self.with_validator(EmailValidator).with_validator(SmsValidator)
    }

    pub fn with_listener(mut self, listener: impl NotificationListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Register an already shared listener, e.g. one the caller also keeps a
    /// handle to for subscribing.
    pub fn with_shared_listener(mut self, listener: Arc<dyn NotificationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Build and start the dispatcher. Requires a Tokio runtime.
    pub fn build(self) -> Result<Dispatcher> {
        Dispatcher::new(
            self.strategies,
            self.validators,
            self.listeners,
            self.pool_size,
        )
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::config::RetryConfig;
    use crate::notification::channels::{SendGridEmailStrategy, TwilioSmsStrategy};
    use crate::notification::domain::{EmailNotification, SmsNotification};
    use crate::notification::events::{BroadcastListener, NotificationStatus};
    use std::time::Duration;

    #[tokio::test]
    async fn test_build_requires_strategy() {
        let err = DispatcherBuilder::new().build().err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_build_rejects_zero_pool() {
        let err = DispatcherBuilder::new()
            .with_strategy(TwilioSmsStrategy::new("AC1", "t"))
            .with_pool_size(0)
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_from_config_sets_pool_size() {
        let config = DispatcherConfig {
            pool_size: 3,
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 5,
            },
        };
        let dispatcher = DispatcherBuilder::from_config(&config)
            .unwrap()
            .with_configured_retry(TwilioSmsStrategy::new("AC1", "t"))
            .build()
            .unwrap();
        assert_eq!(dispatcher.pool_size(), 3);
        dispatcher.shutdown().await;
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = DispatcherConfig {
            pool_size: 0,
            retry: RetryConfig::default(),
        };
        assert!(DispatcherBuilder::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_default_validators_reject_bad_input() {
        let dispatcher = DispatcherBuilder::new()
            .with_strategy(SendGridEmailStrategy::new("SG.key"))
            .with_strategy(TwilioSmsStrategy::new("AC1", "t"))
            .with_default_validators()
            .with_pool_size(1)
            .build()
            .unwrap();

        let sms = SmsNotification::new("999-888", "hi").unwrap();
        assert!(matches!(dispatcher.send(sms), Err(Error::Validation(_))));

        let email = EmailNotification::new("no spaces@example.com", "Hi", "b").unwrap();
        assert!(matches!(dispatcher.send(email), Err(Error::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resilient_strategy_name_in_events() {
        let broadcast = Arc::new(BroadcastListener::default());
        let mut events = broadcast.subscribe();

        let dispatcher = DispatcherBuilder::new()
            .with_resilient_strategy(
                TwilioSmsStrategy::new("AC1", "t"),
                ExponentialBackoff::new(2, Duration::from_millis(10)).unwrap(),
            )
            .with_shared_listener(broadcast.clone())
            .with_pool_size(1)
            .build()
            .unwrap();

        let sms = SmsNotification::new("+51999888777", "hi").unwrap();
        dispatcher.send(sms).unwrap().await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.status(), NotificationStatus::Sent);
        assert_eq!(event.provider_name(), "Twilio-SMS-Service (with retry)");
    }

    #[test]
    fn test_default_policy_matches_default_config() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy, RetryConfig::default().policy().unwrap());
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.initial_delay(), Duration::from_millis(100));
    }
}
