//! Dispatch-time validators.
//!
//! Validators run synchronously on the caller's side of `send`, before any
//! work is queued. Every validator that matches the notification's kind runs;
//! the first failure aborts the dispatch.

use std::sync::LazyLock;

use regex::Regex;

use super::domain::{Notification, NotificationKind};
use crate::error::ValidationError;

/// Format and business-rule checks for one or more notification kinds.
pub trait NotificationValidator: Send + Sync {
    /// Whether this validator applies to notifications of `kind`.
    fn matches(&self, kind: NotificationKind) -> bool;

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError>;
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9+_.-]+@(.+)$").expect("email pattern is valid")
});

// E.164: leading '+', no leading zero, at most 15 digits.
static E164_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("E.164 pattern is valid"));

/// Recipient format and non-blank subject for email.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailValidator;

impl NotificationValidator for EmailValidator {
    fn matches(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Email
    }

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError> {
        let Some(email) = notification.as_email() else {
            return Ok(());
        };

        if !EMAIL_RE.is_match(email.to()) {
            return Err(ValidationError::new(format!(
                "invalid email format for '{}'",
                email.to()
            )));
        }
        if email.subject().trim().is_empty() {
            return Err(ValidationError::new("email subject must not be blank"));
        }
        Ok(())
    }
}

/// E.164 phone number format for SMS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmsValidator;

impl NotificationValidator for SmsValidator {
    fn matches(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Sms
    }

    fn validate(&self, notification: &Notification) -> Result<(), ValidationError> {
        let Some(sms) = notification.as_sms() else {
            return Ok(());
        };

        if !E164_RE.is_match(sms.phone_number()) {
            return Err(ValidationError::new(format!(
                "phone number '{}' must be in E.164 format (e.g. +51999888777)",
                sms.phone_number()
            )));
        }
        Ok(())
    }
}
