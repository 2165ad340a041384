//! Delivery strategies.
//!
//! A strategy is the transport for one notification kind. The dispatcher picks
//! the first registered strategy whose [`DeliveryStrategy::matches`] accepts
//! the notification's kind and calls [`DeliveryStrategy::send`] on a worker.
//!
//! Reference transports:
//! - SendGrid email (simulated)
//! - Twilio SMS (simulated)

mod sendgrid;
mod twilio;

pub use sendgrid::SendGridEmailStrategy;
pub use twilio::TwilioSmsStrategy;

use std::sync::Arc;

use async_trait::async_trait;

use super::domain::{Notification, NotificationKind};
use crate::error::DeliveryError;

/// Transport contract for one notification channel.
///
/// `send` may be invoked several times for the same notification when the
/// strategy is wrapped in a retry decorator; registering a strategy under a
/// retry policy is the caller's statement that re-sending is acceptable.
/// Transient faults are reported as [`DeliveryError::Transient`] and may be
/// retried. A notification kind the strategy cannot deliver is reported as
/// [`DeliveryError::Unsupported`], which is never retried. Anything else is a
/// bug and should panic, which the dispatcher re-raises on the caller's side.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    /// Whether this strategy delivers notifications of `kind`.
    fn matches(&self, kind: NotificationKind) -> bool;

    /// Attempt delivery once.
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;

    /// Display name used in events and logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<S: DeliveryStrategy + ?Sized> DeliveryStrategy for Arc<S> {
    fn matches(&self, kind: NotificationKind) -> bool {
        (**self).matches(kind)
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        (**self).send(notification).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<S: DeliveryStrategy + ?Sized> DeliveryStrategy for Box<S> {
    fn matches(&self, kind: NotificationKind) -> bool {
        (**self).matches(kind)
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        (**self).send(notification).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Keep the first four characters of a credential for log output.
pub(crate) fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("SG.abcdef"), "SG.a***");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret(""), "***");
    }

    #[tokio::test]
    async fn test_shared_and_boxed_strategies_delegate() {
        let shared: Arc<dyn DeliveryStrategy> = Arc::new(TwilioSmsStrategy::new("AC123", "token"));
        let boxed: Box<dyn DeliveryStrategy> = Box::new(SendGridEmailStrategy::new("SG.key"));

        assert!(shared.matches(NotificationKind::Sms));
        assert!(!shared.matches(NotificationKind::Email));
        assert_eq!(DeliveryStrategy::name(&shared), "Twilio-SMS-Service");

        assert!(boxed.matches(NotificationKind::Email));
        assert_eq!(DeliveryStrategy::name(&boxed), "SendGrid-API-v3");

        let sms: Notification = crate::notification::SmsNotification::new("+15550001111", "hi")
            .unwrap()
            .into();
        assert!(DeliveryStrategy::send(&shared, &sms).await.is_ok());
    }
}
