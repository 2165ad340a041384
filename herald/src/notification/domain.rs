//! Notification payloads.
//!
//! Each channel has its own immutable payload type. Structural checks that do
//! not depend on any format rule (a recipient is present, an address looks like
//! an address at all) run in the constructors; format and business rules live in
//! the pluggable validators.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Runtime tag of a notification variant, used to match strategies and
/// validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    Sms,
    Push,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// A notification for any supported channel.
///
/// Payloads are only built through their checked constructors; they serialise
/// for audit output but do not deserialise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Email(EmailNotification),
    Sms(SmsNotification),
    Push(PushNotification),
}

impl Notification {
    /// Unique identifier of the notification.
    pub fn id(&self) -> &str {
        match self {
            Self::Email(n) => &n.id,
            Self::Sms(n) => &n.id,
            Self::Push(n) => &n.id,
        }
    }

    /// Runtime variant used for strategy and validator matching.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Email(_) => NotificationKind::Email,
            Self::Sms(_) => NotificationKind::Sms,
            Self::Push(_) => NotificationKind::Push,
        }
    }

    /// The email payload, if this is an email.
    pub fn as_email(&self) -> Option<&EmailNotification> {
        match self {
            Self::Email(n) => Some(n),
            _ => None,
        }
    }

    /// The SMS payload, if this is an SMS.
    pub fn as_sms(&self) -> Option<&SmsNotification> {
        match self {
            Self::Sms(n) => Some(n),
            _ => None,
        }
    }

    /// The push payload, if this is a push message.
    pub fn as_push(&self) -> Option<&PushNotification> {
        match self {
            Self::Push(n) => Some(n),
            _ => None,
        }
    }
}

impl From<EmailNotification> for Notification {
    fn from(n: EmailNotification) -> Self {
        Self::Email(n)
    }
}

impl From<SmsNotification> for Notification {
    fn from(n: SmsNotification) -> Self {
        Self::Sms(n)
    }
}

impl From<PushNotification> for Notification {
    fn from(n: PushNotification) -> Self {
        Self::Push(n)
    }
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn check_id(id: String) -> Result<String> {
    if id.trim().is_empty() {
        return Err(Error::validation("notification id must not be blank"));
    }
    Ok(id)
}

/// An email message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailNotification {
    id: String,
    to: String,
    subject: String,
    body: String,
    template_variables: BTreeMap<String, String>,
}

impl EmailNotification {
    /// Create an email with a generated id.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self> {
        Self::with_id(generate_id(), to, subject, body, BTreeMap::new())
    }

    /// Create an email with a caller-supplied id and template variables.
    pub fn with_id(
        id: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        template_variables: BTreeMap<String, String>,
    ) -> Result<Self> {
        let to = to.into();
        if !to.contains('@') {
            return Err(Error::validation(format!(
                "invalid email address: '{}'",
                to
            )));
        }

        Ok(Self {
            id: check_id(id.into())?,
            to,
            subject: subject.into(),
            body: body.into(),
            template_variables,
        })
    }

    /// Unique identifier of the notification.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Recipient address.
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Subject line.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Message body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Values substituted into the provider template.
    pub fn template_variables(&self) -> &BTreeMap<String, String> {
        &self.template_variables
    }
}

/// A text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsNotification {
    id: String,
    phone_number: String,
    message: String,
}

impl SmsNotification {
    /// Create an SMS with a generated id.
    pub fn new(phone_number: impl Into<String>, message: impl Into<String>) -> Result<Self> {
        Self::with_id(generate_id(), phone_number, message)
    }

    /// Create an SMS with a caller-supplied id.
    pub fn with_id(
        id: impl Into<String>,
        phone_number: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self> {
        let phone_number = phone_number.into();
        if phone_number.trim().is_empty() {
            return Err(Error::validation("phone number is required"));
        }

        Ok(Self {
            id: check_id(id.into())?,
            phone_number,
            message: message.into(),
        })
    }

    /// Unique identifier of the notification.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Destination number.
    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    /// Text content.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A mobile push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    id: String,
    device_token: String,
    title: String,
    body: String,
}

impl PushNotification {
    /// Create a push message with a generated id.
    pub fn new(
        device_token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self> {
        Self::with_id(generate_id(), device_token, title, body)
    }

    /// Create a push message with a caller-supplied id.
    pub fn with_id(
        id: impl Into<String>,
        device_token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self> {
        let device_token = device_token.into();
        if device_token.trim().is_empty() {
            return Err(Error::validation("device token is required"));
        }

        Ok(Self {
            id: check_id(id.into())?,
            device_token,
            title: title.into(),
            body: body.into(),
        })
    }

    /// Unique identifier of the notification.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Target device registration token.
    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    /// Title shown in the notification tray.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Message body.
    pub fn body(&self) -> &str {
        &self.body
    }
}
