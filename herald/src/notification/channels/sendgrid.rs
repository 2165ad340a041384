//! SendGrid email transport (simulated).

use async_trait::async_trait;
use tracing::{debug, info};

use super::{DeliveryStrategy, mask_secret};
use crate::error::DeliveryError;
use crate::notification::domain::{Notification, NotificationKind};

const SENDGRID_NAME: &str = "SendGrid-API-v3";

/// Email delivery through the SendGrid v3 mail API.
///
/// The request is logged instead of sent; a real gateway call would answer
/// `202 Accepted` for the same payload.
pub struct SendGridEmailStrategy {
    api_key: String,
}

impl SendGridEmailStrategy {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl DeliveryStrategy for SendGridEmailStrategy {
    fn matches(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Email
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let email = notification
            .as_email()
            .ok_or_else(|| DeliveryError::unsupported(SENDGRID_NAME, notification.kind()))?;

        debug!(
            api_key = %mask_secret(&self.api_key),
            "Connecting to api.sendgrid.com"
        );
        info!(
            notification_id = %email.id(),
            to = %email.to(),
            subject = %email.subject(),
            variables = email.template_variables().len(),
            "[simulated] SendGrid mail send accepted"
        );

        Ok(())
    }

    fn name(&self) -> &str {
        SENDGRID_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::domain::{EmailNotification, PushNotification};

    #[tokio::test]
    async fn test_sends_email() {
        let strategy = SendGridEmailStrategy::new("SG.secret");
        let email: Notification = EmailNotification::new("ana@example.com", "Welcome", "Hi")
            .unwrap()
            .into();

        assert!(strategy.matches(NotificationKind::Email));
        assert!(!strategy.matches(NotificationKind::Sms));
        assert!(strategy.send(&email).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_other_kinds() {
        let strategy = SendGridEmailStrategy::new("SG.secret");
        let push: Notification = PushNotification::new("device", "t", "b").unwrap().into();

        let err = strategy.send(&push).await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::unsupported("SendGrid-API-v3", NotificationKind::Push)
        );
        assert!(!err.is_retryable());
    }
}
