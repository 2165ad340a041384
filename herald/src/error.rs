//! Crate-wide error types.
//!
//! Failures fall into four groups:
//! - validation: bad input, reported synchronously by `send`
//! - configuration: setup defects, reported at construction or at dispatch
//! - delivery: transport failures, reported through the completion handle
//! - lifecycle: the dispatcher was shut down or the caller cancelled

use thiserror::Error;

use crate::notification::NotificationKind;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration error: no delivery strategy registered for {kind} notifications")]
    NoMatchingStrategy { kind: NotificationKind },

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Dispatcher is shut down")]
    Shutdown,

    #[error("Dispatch cancelled before delivery started")]
    Cancelled,
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(msg))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error stems from a setup defect rather than bad input or a
    /// transport fault.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::NoMatchingStrategy { .. }
        )
    }
}

/// A notification failed a structural or format check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure reported by a delivery strategy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Technical or network fault; re-sending may succeed.
    #[error("provider [{provider}] failed: {message}")]
    Transient { provider: String, message: String },

    /// Every attempt allowed by the retry policy failed.
    #[error("provider [{provider}] gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        #[source]
        last: Box<DeliveryError>,
    },

    /// The strategy was handed a notification kind it cannot deliver.
    #[error("provider [{provider}] cannot deliver {kind} notifications")]
    Unsupported {
        provider: String,
        kind: NotificationKind,
    },

    /// The dispatch was cancelled while waiting to retry.
    #[error("provider [{provider}] retry interrupted after {attempts} attempts: dispatch cancelled")]
    Cancelled { provider: String, attempts: u32 },
}

impl DeliveryError {
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn retries_exhausted(provider: impl Into<String>, attempts: u32, last: DeliveryError) -> Self {
        Self::RetriesExhausted {
            provider: provider.into(),
            attempts,
            last: Box::new(last),
        }
    }

    pub fn unsupported(provider: impl Into<String>, kind: NotificationKind) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            kind,
        }
    }

    pub fn cancelled(provider: impl Into<String>, attempts: u32) -> Self {
        Self::Cancelled {
            provider: provider.into(),
            attempts,
        }
    }

    /// Name of the provider that reported the failure.
    pub fn provider(&self) -> &str {
        match self {
            Self::Transient { provider, .. }
            | Self::RetriesExhausted { provider, .. }
            | Self::Unsupported { provider, .. }
            | Self::Cancelled { provider, .. } => provider,
        }
    }

    /// Only transient faults are worth another attempt. Exhausted, unsupported
    /// and cancelled errors are terminal, so stacked retry decorators stop at
    /// the innermost one that gave up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// The innermost transient cause, following exhausted-retry wrappers.
    pub fn root_cause(&self) -> &DeliveryError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DeliveryError::transient("smtp", "connection reset").is_retryable());
        assert!(!DeliveryError::cancelled("smtp", 2).is_retryable());
        assert!(!DeliveryError::unsupported("smtp", NotificationKind::Push).is_retryable());
        assert!(
            !DeliveryError::retries_exhausted("smtp", 3, DeliveryError::transient("smtp", "boom"))
                .is_retryable()
        );
    }

    #[test]
    fn test_exhausted_keeps_cause() {
        let cause = DeliveryError::transient("Twilio", "503 from gateway");
        let nested = DeliveryError::retries_exhausted(
            "Twilio (with retry)",
            2,
            DeliveryError::retries_exhausted("Twilio", 3, cause.clone()),
        );

        assert_eq!(nested.root_cause(), &cause);
        assert_eq!(nested.provider(), "Twilio (with retry)");
        let source = std::error::Error::source(&nested).map(|e| e.to_string());
        assert!(source.unwrap().contains("gave up after 3 attempts"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::NoMatchingStrategy {
            kind: NotificationKind::Push,
        };
        assert_eq!(
            err.to_string(),
            "Configuration error: no delivery strategy registered for push notifications"
        );
        assert!(err.is_configuration());

        let err = Error::validation("subject must not be blank");
        assert_eq!(err.to_string(), "Validation error: subject must not be blank");
        assert!(!err.is_configuration());
    }
}
