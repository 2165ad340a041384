//! Twilio SMS transport (simulated).

use async_trait::async_trait;
use tracing::{debug, info};

use super::{DeliveryStrategy, mask_secret};
use crate::error::DeliveryError;
use crate::notification::domain::{Notification, NotificationKind};

const TWILIO_NAME: &str = "Twilio-SMS-Service";

/// SMS delivery through the Twilio Messages API (simulated).
pub struct TwilioSmsStrategy {
    account_sid: String,
    auth_token: String,
}

impl TwilioSmsStrategy {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        }
    }
}

#[async_trait]
impl DeliveryStrategy for TwilioSmsStrategy {
    fn matches(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let sms = notification
            .as_sms()
            .ok_or_else(|| DeliveryError::unsupported(TWILIO_NAME, notification.kind()))?;

        debug!(
            account_sid = %self.account_sid,
            auth_token = %mask_secret(&self.auth_token),
            "POST /2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        info!(
            notification_id = %sms.id(),
            to = %sms.phone_number(),
            length = sms.message().chars().count(),
            "[simulated] Twilio message queued"
        );

        Ok(())
    }

    fn name(&self) -> &str {
        TWILIO_NAME
    }
}
