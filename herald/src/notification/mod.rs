//! Notification dispatch module.
//!
//! Routes notifications of any kind to a matching delivery strategy on a
//! bounded worker pool, with validation, retries and lifecycle events.
//!
//! # Features
//!
//! - Pluggable delivery strategies selected by notification kind
//! - Synchronous dispatch-time validation
//! - Retry with exponential backoff as a composable strategy decorator
//! - Terminal `SENT`/`FAILED` events fanned out to isolated listeners
//! - Per-dispatch completion handles with cancellation
//!
//! # Example
//!
//! ```ignore
//! use herald::notification::{DispatcherBuilder, ExponentialBackoff, SmsNotification};
//! use herald::notification::channels::TwilioSmsStrategy;
//!
//! let dispatcher = DispatcherBuilder::new()
//!     .with_resilient_strategy(
//!         TwilioSmsStrategy::new("AC123", "token"),
//!         ExponentialBackoff::default(),
//!     )
//!     .with_default_validators()
//!     .build()?;
//!
//! let sms = SmsNotification::new("+51999888777", "Your code is 4821")?;
//! let event = dispatcher.send(sms)?.await?;
//! dispatcher.shutdown().await;
//! ```

pub mod builder;
pub mod channels;
pub mod dispatcher;
pub mod domain;
pub mod events;
pub mod retry;
pub mod validation;

pub use builder::DispatcherBuilder;
pub use channels::{DeliveryStrategy, SendGridEmailStrategy, TwilioSmsStrategy};
pub use dispatcher::{DispatchHandle, Dispatcher};
pub use domain::{
    EmailNotification, Notification, NotificationKind, PushNotification, SmsNotification,
};
pub use events::{BroadcastListener, NotificationEvent, NotificationListener, NotificationStatus};
pub use retry::{ExponentialBackoff, RetryPolicy, RetryingStrategy, with_cancellation};
pub use validation::{EmailValidator, NotificationValidator, SmsValidator};
